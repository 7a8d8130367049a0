//! Nucleotide helpers shared by the denoiser, merger and chimera filter.

use sha2::{Digest, Sha256};

pub const NUM_BASES: usize = 4;

/// Length of the k-mers used to screen comparisons.
pub const KMER_SIZE: usize = 5;

const NUM_KMERS: usize = 1 << (2 * KMER_SIZE);

/// Index of a base in the error model, A=0 C=1 G=2 T=3. Ambiguous bases have none.
#[inline]
pub const fn base_index(b: u8) -> Option<usize> {
    match b {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

fn complement(b: u8) -> u8 {
    match b {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        other => other,
    }
}

pub fn revcomp(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| complement(b)).collect()
}

/// Number of mismatching positions of two sequences compared base by base,
/// plus the difference in length.
pub fn hamming(a: &[u8], b: &[u8]) -> usize {
    let shared = a.iter().zip(b).filter(|(x, y)| x != y).count();
    shared + a.len().abs_diff(b.len())
}

/// Stable identifier of a sequence: the first 32 hex digits of its SHA-256.
pub fn sequence_id(seq: &[u8]) -> String {
    let digest = Sha256::digest(seq);
    hex::encode(&digest[..16])
}

/// Counts of every 5-mer of a sequence. K-mers spanning an ambiguous base are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmerProfile {
    counts: Box<[u16]>,
    len: usize,
}

impl KmerProfile {
    pub fn new(seq: &[u8]) -> KmerProfile {
        let mut counts = vec![0u16; NUM_KMERS].into_boxed_slice();
        let mask = NUM_KMERS - 1;
        let mut code = 0usize;
        let mut valid = 0usize;
        for &b in seq {
            match base_index(b) {
                Some(i) => {
                    code = ((code << 2) | i) & mask;
                    valid += 1;
                }
                None => valid = 0,
            }
            if valid >= KMER_SIZE {
                counts[code] = counts[code].saturating_add(1);
            }
        }
        KmerProfile {
            counts,
            len: seq.len(),
        }
    }

    /// One minus the fraction of shared k-mers, relative to the shorter sequence.
    /// Identical sequences have distance 0, sequences sharing no k-mer have 1.
    pub fn distance(&self, other: &KmerProfile) -> f64 {
        let min_len = self.len.min(other.len);
        if min_len < KMER_SIZE {
            return 1.0;
        }
        let shared: u64 = self
            .counts
            .iter()
            .zip(other.counts.iter())
            .map(|(&a, &b)| u64::from(a.min(b)))
            .sum();
        1.0 - shared as f64 / (min_len - KMER_SIZE + 1) as f64
    }
}

/// Length of the longest common prefix.
pub fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Length of the longest common suffix.
pub fn common_suffix(a: &[u8], b: &[u8]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}
