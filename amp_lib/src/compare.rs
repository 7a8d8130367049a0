//! Comparison of a unique sequence against a cluster center: the probability
//! that the sequence was produced from the center by sequencing errors.

use crate::derep::UniqueSequence;
use crate::error_model::{ErrorModel, TransitionCounts};
use crate::sequence::{base_index, KmerProfile};
use bio::alignment::pairwise::{banded, MatchParams};
use bio::alignment::AlignmentOperation::{Del, Ins, Match, Subst, Xclip, Yclip};

/// Equal-length sequences with at most this many mismatches are compared
/// position by position without alignment.
pub const MAX_UNGAPPED_MISMATCH: usize = 8;

const MATCH_SCORE: i32 = 5;
const MISMATCH_SCORE: i32 = -4;
const GAP_OPEN: i32 = 0;
const GAP_EXTEND: i32 = -8;
// k-mer length used to seed the alignment band
const BAND_KMER: usize = 5;

/// Settings that decide which pairs are compared and how.
#[derive(Debug, Clone, Copy)]
pub struct CompareSettings {
    pub use_kmers: bool,
    pub kdist_cutoff: f64,
    pub band_size: usize,
}

/// Outcome of comparing one sequence to one center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    /// Probability of reading the sequence given the center, 0 when the pair
    /// was screened out.
    pub lambda: f64,
    /// Substitutions plus gap columns of the alignment.
    pub differences: u32,
}

impl Comparison {
    pub const SCREENED: Comparison = Comparison {
        lambda: 0.0,
        differences: u32::MAX,
    };
}

/// Aligned columns as (center position, sequence position), gap columns
/// omitted, and the number of differences.
pub fn align(center: &[u8], seq: &[u8], band_size: usize) -> (Vec<(usize, usize)>, u32) {
    if center.len() == seq.len() {
        let mismatches = center.iter().zip(seq).filter(|(a, b)| a != b).count();
        if mismatches <= MAX_UNGAPPED_MISMATCH {
            return ((0..center.len()).map(|i| (i, i)).collect(), mismatches as u32);
        }
    }
    let score = MatchParams::new(MATCH_SCORE, MISMATCH_SCORE);
    let mut aligner = banded::Aligner::new(GAP_OPEN, GAP_EXTEND, score, BAND_KMER, band_size);
    let alignment = aligner.global(center, seq);

    let mut columns = Vec::with_capacity(center.len().max(seq.len()));
    let (mut x, mut y) = (alignment.xstart, alignment.ystart);
    let mut differences = 0u32;
    for op in &alignment.operations {
        match *op {
            Match => {
                columns.push((x, y));
                x += 1;
                y += 1;
            }
            Subst => {
                columns.push((x, y));
                differences += 1;
                x += 1;
                y += 1;
            }
            Ins => {
                differences += 1;
                x += 1;
            }
            Del => {
                differences += 1;
                y += 1;
            }
            Xclip(n) => x += n,
            Yclip(n) => y += n,
        }
    }
    (columns, differences)
}

/// Visit the (center base, read base, quality) of every aligned column where
/// neither base is ambiguous.
fn for_each_transition(
    center: &[u8],
    seq: &UniqueSequence,
    columns: &[(usize, usize)],
    mut f: impl FnMut(usize, usize, u8),
) {
    for &(ci, si) in columns {
        if let (Some(from), Some(to)) = (base_index(center[ci]), base_index(seq.seq[si])) {
            f(from, to, seq.rounded_qual(si));
        }
    }
}

/// Compare `seq` against `center`, returning the probability that the
/// center's true sequence was read as `seq`.
pub fn compare(
    center: &UniqueSequence,
    center_kmers: &KmerProfile,
    seq: &UniqueSequence,
    seq_kmers: &KmerProfile,
    model: &ErrorModel,
    settings: &CompareSettings,
) -> Comparison {
    if settings.use_kmers && center_kmers.distance(seq_kmers) > settings.kdist_cutoff {
        return Comparison::SCREENED;
    }
    let (columns, differences) = align(&center.seq, &seq.seq, settings.band_size);
    let mut lambda = 1.0;
    for_each_transition(&center.seq, seq, &columns, |from, to, q| {
        lambda *= model.rate(from, to, q);
    });
    Comparison {
        lambda,
        differences,
    }
}

/// Add the transitions of `seq` relative to `center`, weighted by the
/// abundance of `seq`. A center compared with itself contributes only
/// correct reads.
pub fn count_transitions(
    center: &UniqueSequence,
    seq: &UniqueSequence,
    band_size: usize,
    counts: &mut TransitionCounts,
) {
    let (columns, _) = align(&center.seq, &seq.seq, band_size);
    let weight = seq.abundance as f64;
    for_each_transition(&center.seq, seq, &columns, |from, to, q| {
        counts.add(from, to, q, weight);
    });
}
