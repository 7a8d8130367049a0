//! Container for the data from a single sequenced amplicon fragment: the
//! forward and reverse mates, each a nucleotide sequence with Phred scores.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Offset of the Phred+33 encoding used by FASTQ quality strings.
pub const PHRED_OFFSET: u8 = 33;

/// The two mates of a paired-end read.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum WhichRead {
    Forward = 0,
    Reverse = 1,
}

impl WhichRead {
    pub const fn both() -> [WhichRead; 2] {
        [WhichRead::Forward, WhichRead::Reverse]
    }

    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for WhichRead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WhichRead::Forward => "forward",
            WhichRead::Reverse => "reverse",
        })
    }
}

/// Probability that a base call with Phred score `q` is wrong.
#[inline]
pub fn phred_to_prob(q: u8) -> f64 {
    10f64.powf(-f64::from(q) / 10.0)
}

/// Sum of the per-base error probabilities of a quality vector.
pub fn expected_errors(qual: &[u8]) -> f64 {
    qual.iter().map(|&q| phred_to_prob(q)).sum()
}

/// One mate: upper-case nucleotides and raw Phred scores of equal length.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Read {
    seq: Vec<u8>,
    qual: Vec<u8>,
}

impl Read {
    /// Build a read from bases and Phred scores. Bases are upper-cased.
    ///
    /// Panics if the lengths differ.
    pub fn new(mut seq: Vec<u8>, qual: Vec<u8>) -> Read {
        assert_eq!(seq.len(), qual.len(), "sequence and quality lengths differ");
        seq.make_ascii_uppercase();
        Read { seq, qual }
    }

    /// Build a read from bases and a Phred+33 quality string.
    /// Returns None if a quality character is below the encoding offset.
    pub fn from_fastq(seq: &[u8], qual: &[u8]) -> Option<Read> {
        if seq.len() != qual.len() {
            return None;
        }
        let qual = qual
            .iter()
            .map(|&c| c.checked_sub(PHRED_OFFSET))
            .collect::<Option<Vec<u8>>>()?;
        Some(Read::new(seq.to_vec(), qual))
    }

    pub fn seq(&self) -> &[u8] {
        &self.seq
    }

    /// Phred scores, without the encoding offset.
    pub fn qual(&self) -> &[u8] {
        &self.qual
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Number of ambiguous bases.
    pub fn n_count(&self) -> usize {
        self.seq.iter().filter(|&&b| b == b'N').count()
    }

    /// Keep only the bases in `start..end`.
    pub fn narrow(&mut self, start: usize, end: usize) {
        let end = end.min(self.seq.len());
        let start = start.min(end);
        self.seq.truncate(end);
        self.qual.truncate(end);
        self.seq.drain(..start);
        self.qual.drain(..start);
    }

    /// Quality string in Phred+33 encoding.
    pub fn qual_string(&self) -> Vec<u8> {
        self.qual.iter().map(|&q| q + PHRED_OFFSET).collect()
    }
}

/// Forward and reverse mates sharing one read name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadPair {
    name: Vec<u8>,
    reads: [Read; 2],
}

impl ReadPair {
    pub fn new(name: Vec<u8>, forward: Read, reverse: Read) -> ReadPair {
        ReadPair {
            name,
            reads: [forward, reverse],
        }
    }

    /// Read name without the mate suffix or comment.
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn read(&self, which: WhichRead) -> &Read {
        &self.reads[which.index()]
    }

    pub fn read_mut(&mut self, which: WhichRead) -> &mut Read {
        &mut self.reads[which.index()]
    }

    pub fn into_reads(self) -> [Read; 2] {
        self.reads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_fastq() {
        let read = Read::from_fastq(b"acgN", b"I#5!").unwrap();
        assert_eq!(read.seq(), b"ACGN");
        assert_eq!(read.qual(), &[40, 2, 20, 0]);
        assert_eq!(read.qual_string(), b"I#5!");
        assert_eq!(read.n_count(), 1);
        assert!(Read::from_fastq(b"AC", b"I").is_none());
        assert!(Read::from_fastq(b"A", b" ").is_none());
    }

    #[test]
    fn test_narrow() {
        let mut read = Read::new(b"ACGTACGT".to_vec(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        read.narrow(2, 6);
        assert_eq!(read.seq(), b"GTAC");
        assert_eq!(read.qual(), &[3, 4, 5, 6]);
        read.narrow(1, 100);
        assert_eq!(read.seq(), b"TAC");
        read.narrow(5, 2);
        assert!(read.is_empty());
    }

    #[test]
    fn test_expected_errors() {
        assert!((phred_to_prob(20) - 0.01).abs() < 1e-12);
        assert!((expected_errors(&[10, 20, 30]) - 0.111).abs() < 1e-12);
        assert_eq!(expected_errors(&[]), 0.0);
    }
}
