//! Errors that stop a sample, and diagnostics that do not.

use amp_fastq::{FastqError, WhichRead};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AmpError {
    #[error("sample {sample}: {message}: {path:?}")]
    Input {
        sample: String,
        path: PathBuf,
        message: String,
    },

    #[error("sample {sample} has no read pairs left after filtering")]
    EmptySample { sample: String },

    #[error("no {which} reads of at least {min_len} bases to learn error rates from")]
    NoLearningData { which: WhichRead, min_len: usize },

    #[error("primer trimming failed for sample {sample}")]
    Trim {
        sample: String,
        #[source]
        source: anyhow::Error,
    },
}

impl AmpError {
    /// Attach the sample name to a problem with one of its FASTQ files.
    pub fn input(sample: &str, err: FastqError) -> AmpError {
        AmpError::Input {
            sample: sample.to_string(),
            path: err.path().to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Recoverable conditions noted while learning or denoising.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// An iterative step stopped before its convergence criterion was met.
    NotConverged {
        stage: String,
        iterations: usize,
        cancelled: bool,
    },
    /// A quality score had no estimate of its own, so the rates of `used`
    /// were substituted.
    QualityGap { quality: u8, used: u8 },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::NotConverged {
                stage,
                iterations,
                cancelled,
            } => {
                write!(f, "{stage} did not converge after {iterations} iterations")?;
                if *cancelled {
                    f.write_str(" (cancelled)")?;
                }
                Ok(())
            }
            Diagnostic::QualityGap { quality, used } => {
                write!(f, "no error rates for quality {quality}, using quality {used}")
            }
        }
    }
}
