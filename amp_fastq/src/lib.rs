//! Tools for working with paired-end amplicon FASTQ files.
//! Major functionality includes:
//! * Paired FASTQ I/O (via the `fastq` crate) over plain, gzip or lz4 files,
//!   with validation of mate counts and names and useful error messages.
//! * A read-pair container holding bases and Phred scores per mate.
//! * Quality filtering and truncation of read pairs.
//! * A narrow interface for removing primers with an external tool.
#![expect(missing_docs)]

pub mod error;
pub mod filter;
pub mod primer;
pub mod read;
pub mod read_pair_iter;

pub use error::FastqError;
pub use filter::{filter_pairs, FilterStats};
pub use read::{Read, ReadPair, WhichRead};
pub use read_pair_iter::{read_pairs, PairWriter, ReadPairIter};
