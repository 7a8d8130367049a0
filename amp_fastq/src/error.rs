use std::path::{Path, PathBuf};
use thiserror::Error;

/// Problems with input FASTQ files. Each variant names the offending file.
#[derive(Debug, Error)]
pub enum FastqError {
    #[error("error opening FASTQ file {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error in FASTQ file {path:?} line {line}: {source}")]
    Io {
        path: PathBuf,
        line: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid FASTQ file {path:?} line {line}: {message}")]
    Format {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error(
        "FASTQ file {ended:?} ended after {records} records but its mate {other:?} has more; \
         forward and reverse files must contain the same number of reads"
    )]
    MateCount {
        ended: PathBuf,
        other: PathBuf,
        records: usize,
    },

    #[error(
        "read names differ at record {record}: {forward_name:?} in {forward:?} \
         but {reverse_name:?} in {reverse:?}"
    )]
    MateName {
        record: usize,
        forward: PathBuf,
        reverse: PathBuf,
        forward_name: String,
        reverse_name: String,
    },
}

impl FastqError {
    /// The file the error refers to.
    pub fn path(&self) -> &Path {
        match self {
            FastqError::Open { path, .. }
            | FastqError::Io { path, .. }
            | FastqError::Format { path, .. } => path,
            FastqError::MateCount { ended, .. } => ended,
            FastqError::MateName { forward, .. } => forward,
        }
    }
}
