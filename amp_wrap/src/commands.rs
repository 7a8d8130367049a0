//! The subcommands of `ampliseq`.

use crate::args::{cancel_token, prepare_out_dir, CommonArgs};
use amp_fastq::primer::TrimJob;
use amp_fastq::{filter_pairs, FilterStats, PairWriter, ReadPairIter};
use amp_lib::output::{error_model_file, write_error_model, write_outputs};
use amp_lib::pipeline::{learn_both, prepare_samples};
use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::process::ExitCode;

/// Exit status of a run that finished but left samples out or stopped early.
const PARTIAL_EXIT: u8 = 2;

fn exit_code(failed: usize, cancelled: bool) -> ExitCode {
    if failed > 0 || cancelled {
        ExitCode::from(PARTIAL_EXIT)
    } else {
        ExitCode::SUCCESS
    }
}

/// The full pipeline, from FASTQ files to the chimera-free sequence table.
pub fn run_pipeline(args: &CommonArgs) -> Result<ExitCode> {
    let params = args.parameters()?;
    let samples = args.samples()?;
    let trimmer = args.trimmer()?;
    prepare_out_dir(&args.out_dir)?;
    info!("processing {} samples", samples.len());

    let outcome = amp_lib::run(
        &samples,
        &params,
        trimmer.as_ref(),
        &args.work_dir(),
        &cancel_token(&params),
    )?;
    let written = write_outputs(&args.out_dir, &outcome)?;
    for path in &written {
        info!("wrote {}", path.display());
    }
    for (sample, reason) in &outcome.failed {
        warn!("sample {sample} was left out: {reason}");
    }
    Ok(exit_code(outcome.failed.len(), outcome.cancelled))
}

fn filter_sample(
    job: &TrimJob,
    trimmer: &dyn amp_fastq::primer::PrimerTrimmer,
    params: &amp_params::FilterParams,
    out_dir: &Path,
) -> Result<FilterStats> {
    let trimmed = trimmer.trim(job)?;
    let [fwd, rev] = &trimmed.outputs;
    let (pairs, stats) = filter_pairs(ReadPairIter::new(fwd, rev)?, params)?;
    let name = &job.sample;
    let mut writer = PairWriter::create(
        &out_dir.join(format!("{name}_R1.filtered.fastq.gz")),
        &out_dir.join(format!("{name}_R2.filtered.fastq.gz")),
    )?;
    for pair in &pairs {
        writer.write(pair)?;
    }
    writer.finish()?;
    info!(
        "{name}: {} of {} read pairs passed filter",
        stats.reads_out, stats.reads_in
    );
    Ok(stats)
}

#[derive(Serialize)]
struct FilterSummary {
    samples: BTreeMap<String, FilterStats>,
    total: FilterStats,
    failed: Vec<String>,
}

/// Trim and filter every sample, writing the passing pairs as FASTQ.
pub fn run_filter(args: &CommonArgs) -> Result<ExitCode> {
    let params = args.parameters()?;
    let samples = args.samples()?;
    let trimmer = args.trimmer()?;
    let filtered_dir = args.out_dir.join("filtered");
    prepare_out_dir(&filtered_dir)?;
    let trim_dir = args.work_dir().join("trimmed");
    prepare_out_dir(&trim_dir)?;

    let mut summary = FilterSummary {
        samples: BTreeMap::new(),
        total: FilterStats::default(),
        failed: Vec::new(),
    };
    for sample in &samples {
        let name = &sample.sample;
        let job = TrimJob {
            sample: name.clone(),
            inputs: sample.fastqs(),
            outputs: [
                trim_dir.join(format!("{name}_R1.fastq.gz")),
                trim_dir.join(format!("{name}_R2.fastq.gz")),
            ],
        };
        match filter_sample(&job, trimmer.as_ref(), &params.filter, &filtered_dir)
            .with_context(|| format!("filtering sample {name}"))
        {
            Ok(stats) => {
                summary.total.merge(stats);
                summary.samples.insert(name.clone(), stats);
            }
            Err(e) => {
                error!("{e:#}");
                summary.failed.push(name.clone());
            }
        }
    }
    if summary.samples.is_empty() {
        bail!("no sample could be filtered");
    }

    let path = args.out_dir.join("filter_stats.json");
    let f = File::create(&path).with_context(|| path.display().to_string())?;
    serde_json::to_writer_pretty(BufWriter::new(f), &summary)?;
    Ok(exit_code(summary.failed.len(), false))
}

/// Learn and write the forward and reverse error models only.
pub fn run_learn_errors(args: &CommonArgs) -> Result<ExitCode> {
    let params = args.parameters()?;
    let samples = args.samples()?;
    let trimmer = args.trimmer()?;
    prepare_out_dir(&args.out_dir)?;
    prepare_out_dir(&args.work_dir().join("trimmed"))?;

    let (prepared, failed) =
        prepare_samples(&samples, &params.filter, trimmer.as_ref(), &args.work_dir());
    if prepared.is_empty() {
        bail!("none of the {} samples has reads to learn from", samples.len());
    }
    let learned = learn_both(&prepared, &params, &cancel_token(&params))?;
    let mut cancelled = false;
    for errors in &learned {
        let path = args.out_dir.join(error_model_file(errors.which));
        write_error_model(&path, errors)?;
        info!(
            "wrote {} ({} iterations, converged: {})",
            path.display(),
            errors.iterations,
            errors.converged
        );
        cancelled |= errors.cancelled;
    }
    Ok(exit_code(failed.len(), cancelled))
}
