//! Result files: the abundance table, the sequence catalog, the read tracking
//! table, learned error models and the variant sequences as FASTA.

use crate::chimera::ChimeraStats;
use crate::error::Diagnostic;
use crate::error_model::transition_name;
use crate::learner::LearnedErrors;
use crate::pipeline::RunOutcome;
use crate::seqtab::SequenceTable;
use crate::sequence::{sequence_id, NUM_BASES};
use crate::track::TrackRow;
use amp_fastq::WhichRead;
use anyhow::{Context, Result};
use itertools::iproduct;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub const SEQTAB_FILE: &str = "seqtab.tsv";
pub const CATALOG_FILE: &str = "sequences.tsv";
pub const TRACK_FILE: &str = "track.tsv";
pub const FASTA_FILE: &str = "asvs.fasta";
pub const SUMMARY_FILE: &str = "summary.json";

pub fn error_model_file(which: WhichRead) -> String {
    format!("errors_{which}.json")
}

fn tsv_writer(path: &Path) -> Result<csv::Writer<File>> {
    csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| path.display().to_string())
}

/// Samples as rows, sequence identifiers as columns.
pub fn write_seqtab(path: &Path, table: &SequenceTable) -> Result<()> {
    let mut w = tsv_writer(path)?;
    let ids = table.sequences().iter().map(|s| sequence_id(s));
    w.write_record(std::iter::once("sample".to_string()).chain(ids))?;
    for (row, sample) in table.samples().iter().enumerate() {
        let counts = table.row(row).into_iter().map(|c| c.to_string());
        w.write_record(std::iter::once(sample.clone()).chain(counts))?;
    }
    w.flush().with_context(|| path.display().to_string())?;
    Ok(())
}

#[derive(Serialize)]
struct CatalogEntry<'a> {
    id: String,
    sequence: &'a str,
}

/// Map each identifier in the abundance table to its sequence.
pub fn write_catalog(path: &Path, table: &SequenceTable) -> Result<()> {
    let mut w = tsv_writer(path)?;
    for seq in table.sequences() {
        w.serialize(CatalogEntry {
            id: sequence_id(seq),
            sequence: std::str::from_utf8(seq)?,
        })?;
    }
    w.flush().with_context(|| path.display().to_string())?;
    Ok(())
}

pub fn write_track(path: &Path, rows: &[TrackRow]) -> Result<()> {
    let mut w = tsv_writer(path)?;
    for row in rows {
        w.serialize(row)?;
    }
    w.flush().with_context(|| path.display().to_string())?;
    Ok(())
}

/// Variant sequences, named by identifier and total abundance.
pub fn write_fasta(path: &Path, table: &SequenceTable) -> Result<()> {
    let mut w = bio::io::fasta::Writer::to_file(path).with_context(|| path.display().to_string())?;
    for (seq, total) in table.sequences().iter().zip(table.column_totals()) {
        let desc = format!("size={total}");
        w.write(&sequence_id(seq), Some(&desc), seq)?;
    }
    w.flush().with_context(|| path.display().to_string())?;
    Ok(())
}

#[derive(Serialize)]
struct ErrorModelJson<'a> {
    which: WhichRead,
    max_quality: u8,
    iterations: usize,
    converged: bool,
    cancelled: bool,
    max_deltas: &'a [f64],
    samples_used: &'a [usize],
    reads_used: u64,
    bases_used: u64,
    diagnostics: &'a [Diagnostic],
    /// Rates per quality score, keyed by transition name such as `A2C`.
    rates: BTreeMap<String, &'a [f64]>,
}

pub fn write_error_model(path: &Path, learned: &LearnedErrors) -> Result<()> {
    let rates = iproduct!(0..NUM_BASES, 0..NUM_BASES)
        .map(|(from, to)| (transition_name(from, to), learned.model.rates(from, to)))
        .collect();
    let json = ErrorModelJson {
        which: learned.which,
        max_quality: learned.model.max_quality(),
        iterations: learned.iterations,
        converged: learned.converged,
        cancelled: learned.cancelled,
        max_deltas: &learned.max_deltas,
        samples_used: &learned.samples_used,
        reads_used: learned.reads_used,
        bases_used: learned.bases_used,
        diagnostics: &learned.diagnostics,
        rates,
    };
    let f = File::create(path).with_context(|| path.display().to_string())?;
    serde_json::to_writer_pretty(BufWriter::new(f), &json)?;
    Ok(())
}

#[derive(Serialize)]
struct RunSummary<'a> {
    chimera: &'a ChimeraStats,
    retained_fraction: f64,
    sequences: usize,
    failed_samples: &'a [(String, String)],
    cancelled: bool,
}

/// Every output of a run, written into `dir`, which is created if needed.
/// Returns the paths written.
pub fn write_outputs(dir: &Path, outcome: &RunOutcome) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| dir.display().to_string())?;
    let path = |name: &str| dir.join(name);

    write_seqtab(&path(SEQTAB_FILE), &outcome.table)?;
    write_catalog(&path(CATALOG_FILE), &outcome.table)?;
    write_fasta(&path(FASTA_FILE), &outcome.table)?;
    write_track(&path(TRACK_FILE), &outcome.track)?;
    let mut written: Vec<PathBuf> = [SEQTAB_FILE, CATALOG_FILE, FASTA_FILE, TRACK_FILE]
        .iter()
        .map(|&name| path(name))
        .collect();
    for learned in &outcome.errors {
        let p = path(error_model_file(learned.which).as_str());
        write_error_model(&p, learned)?;
        written.push(p);
    }

    let summary = RunSummary {
        chimera: &outcome.chimera_stats,
        retained_fraction: outcome.chimera_stats.retained_fraction(),
        sequences: outcome.table.num_sequences(),
        failed_samples: &outcome.failed,
        cancelled: outcome.cancelled,
    };
    let p = path(SUMMARY_FILE);
    let f = File::create(&p).with_context(|| p.display().to_string())?;
    serde_json::to_writer_pretty(BufWriter::new(f), &summary)?;
    written.push(p);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::MergedVariant;
    use amp_params::ColumnOrder;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn table() -> SequenceTable {
        let v = |seq: &[u8], abundance| MergedVariant {
            sequence: seq.to_vec(),
            abundance,
            forward: 0,
            reverse: 0,
            overlap: 12,
            mismatches: 0,
        };
        SequenceTable::build(
            &[
                ("S1".to_string(), vec![v(b"ACGTACGT", 7), v(b"TTTTGGGG", 2)]),
                ("S2".to_string(), vec![v(b"TTTTGGGG", 4)]),
            ],
            ColumnOrder::FirstSeen,
        )
    }

    #[test]
    fn test_seqtab_and_catalog() {
        let dir = TempDir::new().unwrap();
        let t = table();
        let (a, b) = (sequence_id(b"ACGTACGT"), sequence_id(b"TTTTGGGG"));

        let seqtab = dir.path().join(SEQTAB_FILE);
        write_seqtab(&seqtab, &t).unwrap();
        assert_eq!(
            fs::read_to_string(&seqtab).unwrap(),
            format!("sample\t{a}\t{b}\nS1\t7\t2\nS2\t0\t4\n")
        );

        let catalog = dir.path().join(CATALOG_FILE);
        write_catalog(&catalog, &t).unwrap();
        assert_eq!(
            fs::read_to_string(&catalog).unwrap(),
            format!("id\tsequence\n{a}\tACGTACGT\n{b}\tTTTTGGGG\n")
        );

        let fasta = dir.path().join(FASTA_FILE);
        write_fasta(&fasta, &t).unwrap();
        assert_eq!(
            fs::read_to_string(&fasta).unwrap(),
            format!(">{a} size=7\nACGTACGT\n>{b} size=6\nTTTTGGGG\n")
        );
    }

    #[test]
    fn test_track() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(TRACK_FILE);
        let row = TrackRow {
            input: 10,
            filtered: 9,
            denoised_forward: 9,
            denoised_reverse: 8,
            merged: 7,
            nonchim: 7,
            ..TrackRow::new("S1")
        };
        write_track(&path, &[row]).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "sample\tinput\tfiltered\tdenoised_forward\tdenoised_reverse\tmerged\tnonchim\n\
             S1\t10\t9\t9\t8\t7\t7\n"
        );
    }
}
