//! Command-line arguments shared by the subcommands.

use amp_fastq::primer::{ExternalTrimmer, PassThrough, PrimerTrimmer};
use amp_lib::{read_sample_sheet, CancelToken, Sample};
use amp_params::{ChimeraMethod, Parameters};
use anyhow::{ensure, Context, Result};
use clap::Args;
use log::{info, LevelFilter};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Inputs, outputs and runtime options.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Tab-separated file with the columns sample, forward and reverse.
    #[clap(long, value_name = "TSV")]
    pub sample_sheet: PathBuf,

    /// Directory for results and intermediate files.
    #[clap(long, value_name = "PATH")]
    pub out_dir: PathBuf,

    /// TOML file with pipeline parameters. Defaults are used for anything it omits.
    #[clap(long, value_name = "TOML")]
    pub params: Option<PathBuf>,

    /// Worker threads; 0 uses one per core.
    #[clap(long, value_name = "NUM")]
    pub threads: Option<usize>,

    /// Stop iterating after this many seconds and report partial results.
    #[clap(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Primer trimming command run once per sample, with the placeholders
    /// {in1} {in2} {out1} {out2} and optionally {sample}. Reads are used
    /// as they are when this is not given.
    #[clap(long, value_name = "COMMAND")]
    pub primer_cmd: Option<String>,

    /// Log level: error, warn, info, debug or trace. Overrides RUST_LOG.
    #[clap(long, value_name = "LEVEL")]
    pub log_level: Option<LevelFilter>,

    #[clap(flatten)]
    pub overrides: ParamOverrides,
}

/// Parameters that may be set on the command line instead of in the TOML file.
#[derive(Args, Debug, Clone, Default)]
pub struct ParamOverrides {
    /// Forward and reverse truncation lengths, e.g. 240,160.
    #[clap(long, value_delimiter = ',', value_name = "FWD,REV")]
    pub trunc_len: Option<Vec<usize>>,

    /// Forward and reverse maximum expected errors, e.g. 2,2.
    #[clap(long, value_delimiter = ',', value_name = "FWD,REV")]
    pub max_ee: Option<Vec<f64>>,

    /// Bases required in the overlap of merged mates.
    #[clap(long, value_name = "NUM")]
    pub min_overlap: Option<usize>,

    /// Keep only merged sequences with a length in MIN..=MAX.
    #[clap(long, value_delimiter = ',', value_name = "MIN,MAX")]
    pub length_band: Option<Vec<usize>>,

    /// Chimera calling method: consensus, per-sample or pooled.
    #[clap(long, value_name = "METHOD")]
    pub chimera_method: Option<ChimeraMethod>,

    /// Fold abundance parents need over a chimera.
    #[clap(long, value_name = "FOLD")]
    pub min_fold_parent_over_abundance: Option<f64>,

    /// Fraction of samples that must flag a consensus chimera.
    #[clap(long, value_name = "FRAC")]
    pub min_sample_fraction: Option<f64>,

    /// Stop learning error rates once no rate changes more than this.
    #[clap(long, value_name = "DELTA")]
    pub convergence: Option<f64>,

    /// Maximum error learning iterations.
    #[clap(long, value_name = "NUM")]
    pub max_consist: Option<usize>,

    /// Bases to learn error rates from.
    #[clap(long, value_name = "NUM")]
    pub nbases: Option<u64>,
}

fn pair<T: Copy + Debug>(name: &str, values: &[T]) -> Result<[T; 2]> {
    ensure!(
        values.len() == 2,
        "--{name} takes two comma-separated values, got {values:?}"
    );
    Ok([values[0], values[1]])
}

fn set<T: Debug>(name: &str, target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        info!("{name} = {value:?} from the command line");
        *target = value;
    }
}

impl ParamOverrides {
    /// Apply every given override to `params`.
    pub fn apply(&self, params: &mut Parameters) -> Result<()> {
        let trunc_len = self.trunc_len.as_deref().map(|v| pair("trunc-len", v)).transpose()?;
        set("filter.trunc_len", &mut params.filter.trunc_len, trunc_len);
        let max_ee = self.max_ee.as_deref().map(|v| pair("max-ee", v)).transpose()?;
        set("filter.max_ee", &mut params.filter.max_ee, max_ee);
        set("merge.min_overlap", &mut params.merge.min_overlap, self.min_overlap);
        if let Some(band) = &self.length_band {
            let band = pair("length-band", band)?;
            set("table.length_band", &mut params.table.length_band, Some(Some(band)));
        }
        set("chimera.method", &mut params.chimera.method, self.chimera_method);
        set(
            "chimera.min_fold_parent_over_abundance",
            &mut params.chimera.min_fold_parent_over_abundance,
            self.min_fold_parent_over_abundance,
        );
        set(
            "chimera.min_sample_fraction",
            &mut params.chimera.min_sample_fraction,
            self.min_sample_fraction,
        );
        set("learn.convergence", &mut params.learn.convergence, self.convergence);
        set("learn.max_consist", &mut params.learn.max_consist, self.max_consist);
        set("learn.nbases", &mut params.learn.nbases, self.nbases);
        Ok(())
    }
}

impl CommonArgs {
    /// Parameters from the TOML file with command-line overrides applied.
    pub fn parameters(&self) -> Result<Parameters> {
        let mut params = Parameters::load(self.params.as_deref())?;
        self.overrides.apply(&mut params)?;
        set("runtime.threads", &mut params.runtime.threads, self.threads);
        set("runtime.timeout_secs", &mut params.runtime.timeout_secs, self.timeout.map(Some));
        params.validate().context("invalid parameters")?;
        Ok(params)
    }

    pub fn samples(&self) -> Result<Vec<Sample>> {
        read_sample_sheet(&self.sample_sheet)
            .with_context(|| format!("reading sample sheet {}", self.sample_sheet.display()))
    }

    pub fn trimmer(&self) -> Result<Box<dyn PrimerTrimmer>> {
        Ok(match &self.primer_cmd {
            Some(template) => Box::new(ExternalTrimmer::from_template(template)?),
            None => Box::new(PassThrough),
        })
    }

    pub fn work_dir(&self) -> PathBuf {
        self.out_dir.join("work")
    }

    /// Install the logger. `RUST_LOG` applies unless `--log-level` is given;
    /// the default level is info.
    pub fn init_logging(&self) {
        let env = env_logger::Env::default().default_filter_or("info");
        let mut builder = env_logger::Builder::from_env(env);
        if let Some(level) = self.log_level {
            builder.filter_level(level);
        }
        // A logger may already be installed when running under a test harness.
        let _ = builder.try_init();
    }
}

/// A cancellation token honouring `runtime.timeout_secs`.
pub fn cancel_token(params: &Parameters) -> CancelToken {
    match params.runtime.timeout_secs {
        Some(secs) => CancelToken::with_timeout(Duration::from_secs(secs)),
        None => CancelToken::new(),
    }
}

/// Create the output directory, refusing to write into a regular file.
pub fn prepare_out_dir(dir: &Path) -> Result<()> {
    ensure!(
        !dir.is_file(),
        "output directory {} is an existing file",
        dir.display()
    );
    std::fs::create_dir_all(dir).with_context(|| dir.display().to_string())
}
