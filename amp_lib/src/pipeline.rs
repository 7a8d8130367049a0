//! The whole run: per-sample ingestion, error learning over all samples,
//! per-sample denoising and merging, then one table for the study.
//!
//! Samples are processed independently on the rayon pool and only meet again
//! when the sequence table is built. A sample that fails to load is reported
//! and left out; it never stops the others.

use crate::cancel::CancelToken;
use crate::chimera::{remove_bimeras, ChimeraStats};
use crate::denoise::denoise;
use crate::derep::{dereplicate, Dereplicated};
use crate::error::AmpError;
use crate::learner::{learn_errors, LearnedErrors};
use crate::merge::{merge_pairs, DenoisedReads, MergedVariant};
use crate::sample_sheet::Sample;
use crate::seqtab::SequenceTable;
use crate::track::TrackRow;
use amp_fastq::primer::{PrimerTrimmer, TrimJob};
use amp_fastq::{filter_pairs, ReadPairIter, WhichRead};
use amp_params::{FilterParams, Parameters};
use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

/// A sample after trimming, filtering and dereplication.
#[derive(Debug, Clone)]
pub struct PreparedSample {
    pub name: String,
    pub track: TrackRow,
    /// Forward and reverse unique sequences.
    pub derep: [Dereplicated; 2],
}

/// Everything a run produces.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Abundances after length and chimera filtering.
    pub table: SequenceTable,
    pub chimera_stats: ChimeraStats,
    pub track: Vec<TrackRow>,
    /// Samples left out, with the reason.
    pub failed: Vec<(String, String)>,
    /// Forward and reverse error models.
    pub errors: [LearnedErrors; 2],
    pub cancelled: bool,
}

fn trimmed_paths(work_dir: &Path, sample: &str) -> [PathBuf; 2] {
    let dir = work_dir.join("trimmed");
    [
        dir.join(format!("{sample}_R1.fastq.gz")),
        dir.join(format!("{sample}_R2.fastq.gz")),
    ]
}

/// Trim primers, read, filter and dereplicate one sample.
pub fn prepare_sample(
    sample: &Sample,
    params: &FilterParams,
    trimmer: &dyn PrimerTrimmer,
    work_dir: &Path,
) -> Result<PreparedSample, AmpError> {
    let name = sample.sample.as_str();
    let trim_error = |source| AmpError::Trim {
        sample: name.to_string(),
        source,
    };
    let job = TrimJob {
        sample: name.to_string(),
        inputs: sample.fastqs(),
        outputs: trimmed_paths(work_dir, name),
    };
    let trimmed = trimmer.trim(&job).map_err(trim_error)?;

    let [fwd, rev] = &trimmed.outputs;
    let pairs = ReadPairIter::new(fwd, rev).map_err(|e| AmpError::input(name, e))?;
    let (pairs, stats) = filter_pairs(pairs, params).map_err(|e| AmpError::input(name, e))?;
    info!(
        "{name}: {} of {} read pairs passed filter",
        stats.reads_out, stats.reads_in
    );
    if pairs.is_empty() {
        return Err(AmpError::EmptySample {
            sample: name.to_string(),
        });
    }

    let derep = WhichRead::both().map(|which| dereplicate(pairs.iter().map(|p| p.read(which))));
    info!(
        "{name}: {} forward and {} reverse unique sequences",
        derep[0].uniques.len(),
        derep[1].uniques.len()
    );
    Ok(PreparedSample {
        name: name.to_string(),
        track: TrackRow {
            input: stats.reads_in,
            filtered: stats.reads_out,
            ..TrackRow::new(name)
        },
        derep,
    })
}

/// Prepare every sample in parallel. Failures are logged and returned with
/// the sample name; the order of `samples` is kept.
pub fn prepare_samples(
    samples: &[Sample],
    params: &FilterParams,
    trimmer: &dyn PrimerTrimmer,
    work_dir: &Path,
) -> (Vec<PreparedSample>, Vec<(String, String)>) {
    let results: Vec<_> = samples
        .par_iter()
        .map(|s| prepare_sample(s, params, trimmer, work_dir))
        .collect();
    let mut prepared = Vec::new();
    let mut failed = Vec::new();
    for (sample, result) in samples.iter().zip(results) {
        match result {
            Ok(p) => prepared.push(p),
            Err(e) => {
                let message = format!("{:#}", anyhow::Error::new(e));
                error!("skipping sample {}: {message}", sample.sample);
                failed.push((sample.sample.clone(), message));
            }
        }
    }
    (prepared, failed)
}

/// Shortest read length usable for learning in one direction.
fn learning_min_len(params: &FilterParams, which: WhichRead) -> usize {
    match params.trunc_len[which.index()] {
        0 => params.min_len,
        n => n,
    }
}

/// Learn the forward and reverse error models concurrently.
pub fn learn_both(
    samples: &[PreparedSample],
    params: &Parameters,
    cancel: &CancelToken,
) -> Result<[LearnedErrors; 2]> {
    let learn = |which: WhichRead| {
        let dereps: Vec<&Dereplicated> = samples.iter().map(|s| &s.derep[which.index()]).collect();
        learn_errors(
            which,
            &dereps,
            learning_min_len(&params.filter, which),
            &params.learn,
            &params.denoise,
            cancel,
        )
    };
    let (fwd, rev) = rayon::join(|| learn(WhichRead::Forward), || learn(WhichRead::Reverse));
    Ok([fwd?, rev?])
}

struct SampleVariants {
    variants: Vec<MergedVariant>,
    track: TrackRow,
    cancelled: bool,
}

fn denoise_and_merge(
    sample: &PreparedSample,
    errors: &[LearnedErrors; 2],
    params: &Parameters,
    cancel: &CancelToken,
) -> SampleVariants {
    let [fwd, rev] = WhichRead::both().map(|which| {
        let i = which.index();
        let result = denoise(
            &sample.derep[i].uniques,
            &errors[i].model,
            &params.denoise,
            cancel,
        );
        info!(
            "{}: {} {which} unique sequences denoised into {} variants",
            sample.name,
            sample.derep[i].uniques.len(),
            result.clusters.len()
        );
        result
    });
    let (variants, stats) = merge_pairs(
        DenoisedReads {
            derep: &sample.derep[0],
            denoised: &fwd,
        },
        DenoisedReads {
            derep: &sample.derep[1],
            denoised: &rev,
        },
        &params.merge,
    );
    info!(
        "{}: merged {} of {} read pairs, {} cluster combinations rejected",
        sample.name, stats.merged_pairs, stats.input_pairs, stats.rejected_combinations
    );
    SampleVariants {
        variants,
        track: TrackRow {
            denoised_forward: fwd.denoised_reads(),
            denoised_reverse: rev.denoised_reads(),
            merged: stats.merged_pairs,
            ..sample.track.clone()
        },
        cancelled: fwd.cancelled || rev.cancelled,
    }
}

/// Build the table from per-sample variants, apply the length band and
/// remove chimeras. Fills in the non-chimeric count of each track row.
pub fn finish_table(
    per_sample: Vec<(String, Vec<MergedVariant>)>,
    track: &mut [TrackRow],
    params: &Parameters,
) -> (SequenceTable, ChimeraStats) {
    let mut table = SequenceTable::build(&per_sample, params.table.order);
    info!(
        "{} distinct sequences in {} samples",
        table.num_sequences(),
        table.num_samples()
    );
    if let Some([min, max]) = params.table.length_band {
        let kept = table.filter_lengths(min, max);
        info!(
            "{} of {} sequences have a length in {min}..={max}",
            kept.num_sequences(),
            table.num_sequences()
        );
        table = kept;
    }
    let (table, stats) = remove_bimeras(&table, &params.chimera);
    for (row, total) in track.iter_mut().zip(table.row_totals()) {
        row.nonchim = total;
    }
    (table, stats)
}

fn run_samples(
    samples: &[Sample],
    params: &Parameters,
    trimmer: &dyn PrimerTrimmer,
    work_dir: &Path,
    cancel: &CancelToken,
) -> Result<RunOutcome> {
    let (prepared, failed) = prepare_samples(samples, &params.filter, trimmer, work_dir);
    if prepared.is_empty() {
        bail!("none of the {} samples has reads to process", samples.len());
    }

    let errors = learn_both(&prepared, params, cancel)?;

    let results: Vec<SampleVariants> = prepared
        .par_iter()
        .map(|s| denoise_and_merge(s, &errors, params, cancel))
        .collect();
    let mut cancelled = errors.iter().any(|e| e.cancelled);
    let mut track = Vec::with_capacity(results.len());
    let mut per_sample = Vec::with_capacity(results.len());
    for (sample, r) in prepared.iter().zip(results) {
        cancelled |= r.cancelled;
        track.push(r.track);
        per_sample.push((sample.name.clone(), r.variants));
    }
    if cancelled {
        warn!("run was cancelled; results are from partially converged models");
    }

    let (table, chimera_stats) = finish_table(per_sample, &mut track, params);
    for row in track.iter().filter(|r| !r.is_monotone()) {
        warn!("read counts of sample {} increase between stages: {row:?}", row.sample);
    }
    Ok(RunOutcome {
        table,
        chimera_stats,
        track,
        failed,
        errors,
        cancelled,
    })
}

/// Run the pipeline over `samples`. Intermediate files are written under
/// `work_dir`. Uses a pool of `params.runtime.threads` threads, or the
/// global rayon pool when that is 0.
pub fn run(
    samples: &[Sample],
    params: &Parameters,
    trimmer: &dyn PrimerTrimmer,
    work_dir: &Path,
    cancel: &CancelToken,
) -> Result<RunOutcome> {
    fs::create_dir_all(work_dir.join("trimmed"))
        .with_context(|| work_dir.display().to_string())?;
    match params.runtime.threads {
        0 => run_samples(samples, params, trimmer, work_dir, cancel),
        n => {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(n).build()?;
            pool.install(|| run_samples(samples, params, trimmer, work_dir, cancel))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amp_fastq::primer::PassThrough;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write_sample(dir: &Path, name: &str, fwd: &str, rev: &str) -> Sample {
        let forward = dir.join(format!("{name}_R1.fastq"));
        let reverse = dir.join(format!("{name}_R2.fastq"));
        fs::write(&forward, fwd).unwrap();
        fs::write(&reverse, rev).unwrap();
        Sample {
            sample: name.to_string(),
            forward,
            reverse,
        }
    }

    #[test]
    fn test_failed_sample_is_isolated() {
        let dir = TempDir::new().unwrap();
        let seq = "ACGT".repeat(10);
        let qual = "I".repeat(40);
        let good = write_sample(
            dir.path(),
            "good",
            &format!("@r1 1\n{seq}\n+\n{qual}\n"),
            &format!("@r1 2\n{seq}\n+\n{qual}\n"),
        );
        let truncated = write_sample(
            dir.path(),
            "truncated",
            &format!("@r1 1\n{seq}\n+\n{qual}\n@r2 1\n{seq}\n+\n{qual}\n"),
            &format!("@r1 2\n{seq}\n+\n{qual}\n"),
        );
        let (prepared, failed) = prepare_samples(
            &[good, truncated],
            &FilterParams::default(),
            &PassThrough,
            dir.path(),
        );
        assert_eq!(prepared.len(), 1);
        assert_eq!(prepared[0].name, "good");
        assert_eq!((prepared[0].track.input, prepared[0].track.filtered), (1, 1));
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "truncated");
    }

    #[test]
    fn test_empty_after_filter() {
        let dir = TempDir::new().unwrap();
        let s = write_sample(dir.path(), "short", "@r1\nACGT\n+\nIIII\n", "@r1\nACGT\n+\nIIII\n");
        let err = prepare_sample(&s, &FilterParams::default(), &PassThrough, dir.path()).unwrap_err();
        assert!(matches!(err, AmpError::EmptySample { .. }));
    }
}
