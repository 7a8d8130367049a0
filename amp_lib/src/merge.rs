//! Join the denoised forward and reverse sequences of each read pair into a
//! full-length amplicon.

use crate::denoise::DenoiseResult;
use crate::derep::Dereplicated;
use crate::sequence::revcomp;
use amp_params::MergeParams;
use fxhash::FxHashMap;
use log::debug;
use serde::{Deserialize, Serialize};

/// Ns placed between the mates when concatenating instead of overlapping.
pub const CONCAT_SPACER: usize = 10;

const OVERLAP_MATCH: i64 = 1;
const OVERLAP_MISMATCH: i64 = -64;

/// A merged amplicon sequence and the read pairs supporting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedVariant {
    pub sequence: Vec<u8>,
    /// Read pairs whose forward and reverse clusters are this combination.
    pub abundance: u64,
    /// Forward cluster index.
    pub forward: usize,
    /// Reverse cluster index.
    pub reverse: usize,
    /// Overlap length; 0 for concatenated mates.
    pub overlap: usize,
    pub mismatches: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    pub input_pairs: u64,
    pub merged_pairs: u64,
    pub rejected_pairs: u64,
    /// Distinct (forward, reverse) cluster combinations that failed to merge.
    pub rejected_combinations: usize,
}

/// One read direction of a sample: its unique sequences and their clusters.
#[derive(Debug, Clone, Copy)]
pub struct DenoisedReads<'a> {
    pub derep: &'a Dereplicated,
    pub denoised: &'a DenoiseResult,
}

impl DenoisedReads<'_> {
    /// Cluster of every read, in read order.
    fn read_clusters(&self) -> Vec<usize> {
        self.derep
            .read_map()
            .into_iter()
            .map(|u| self.denoised.assignment[u])
            .collect()
    }

    fn center_qual(&self, cluster: usize) -> &[f64] {
        &self.derep.uniques[self.denoised.clusters[cluster].center].mean_qual
    }
}

/// Best ungapped overlap of the end of `fwd` with the start of `rev`, as
/// (overlap length, mismatches). Overlaps shorter than `min_overlap` are not
/// considered. Ties go to the longer overlap.
fn best_overlap(fwd: &[u8], rev: &[u8], min_overlap: usize) -> Option<(usize, usize)> {
    let max_overlap = fwd.len().min(rev.len());
    (min_overlap..=max_overlap)
        .rev()
        .map(|o| {
            let mismatches = fwd[fwd.len() - o..]
                .iter()
                .zip(&rev[..o])
                .filter(|(a, b)| a != b)
                .count();
            let score = (o - mismatches) as i64 * OVERLAP_MATCH + mismatches as i64 * OVERLAP_MISMATCH;
            (score, o, mismatches)
        })
        .max_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)))
        .map(|(_, o, m)| (o, m))
}

/// Merge one forward center with one reverse center. `rev` and `rev_qual`
/// are already reverse-complemented. Overlap mismatches take the base of
/// the mate with the higher mean quality, the forward mate on ties.
fn merge_centers(
    fwd: &[u8],
    fwd_qual: &[f64],
    rev: &[u8],
    rev_qual: &[f64],
    params: &MergeParams,
) -> Option<(Vec<u8>, usize, usize)> {
    if params.just_concatenate {
        let mut seq = fwd.to_vec();
        seq.extend(std::iter::repeat(b'N').take(CONCAT_SPACER));
        seq.extend_from_slice(rev);
        return Some((seq, 0, 0));
    }
    let (overlap, mismatches) = best_overlap(fwd, rev, params.min_overlap)?;
    let allowed = if params.lenient { params.max_mismatch } else { 0 };
    if mismatches > allowed {
        return None;
    }
    let start = fwd.len() - overlap;
    let mut seq = fwd.to_vec();
    for i in 0..overlap {
        if seq[start + i] != rev[i] && rev_qual[i] > fwd_qual[start + i] {
            seq[start + i] = rev[i];
        }
    }
    seq.extend_from_slice(&rev[overlap..]);
    Some((seq, overlap, mismatches))
}

/// Merge the read pairs of one sample. Pairs are grouped by their
/// (forward cluster, reverse cluster) combination, each combination is merged
/// once from the cluster centers, and its abundance is the number of pairs
/// in it. Combinations are reported in order of first appearance.
pub fn merge_pairs(
    forward: DenoisedReads<'_>,
    reverse: DenoisedReads<'_>,
    params: &MergeParams,
) -> (Vec<MergedVariant>, MergeStats) {
    let fwd_clusters = forward.read_clusters();
    let rev_clusters = reverse.read_clusters();
    assert_eq!(
        fwd_clusters.len(),
        rev_clusters.len(),
        "forward and reverse reads are not paired"
    );

    let mut order: Vec<(usize, usize)> = Vec::new();
    let mut pair_counts: FxHashMap<(usize, usize), u64> = FxHashMap::default();
    for (&f, &r) in fwd_clusters.iter().zip(&rev_clusters) {
        *pair_counts.entry((f, r)).or_insert_with(|| {
            order.push((f, r));
            0
        }) += 1;
    }

    let mut stats = MergeStats {
        input_pairs: fwd_clusters.len() as u64,
        ..MergeStats::default()
    };
    let mut merged = Vec::new();
    for (f, r) in order {
        let count = pair_counts[&(f, r)];
        let fwd = &forward.denoised.clusters[f].sequence;
        let rev = revcomp(&reverse.denoised.clusters[r].sequence);
        let rev_qual: Vec<f64> = reverse.center_qual(r).iter().rev().copied().collect();
        match merge_centers(fwd, forward.center_qual(f), &rev, &rev_qual, params) {
            Some((sequence, overlap, mismatches)) => {
                stats.merged_pairs += count;
                merged.push(MergedVariant {
                    sequence,
                    abundance: count,
                    forward: f,
                    reverse: r,
                    overlap,
                    mismatches,
                });
            }
            None => {
                debug!("no acceptable overlap for clusters {f}/{r} ({count} pairs)");
                stats.rejected_pairs += count;
                stats.rejected_combinations += 1;
            }
        }
    }
    merged.sort_by(|a, b| b.abundance.cmp(&a.abundance));
    (merged, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const AMPLICON: &[u8] = b"GTGCCAGCAGCCGCGGTAATACGTAGGGTGCAAGCGTTAATCGGAATTACTGGGCGTAAAGCGCACGCAGGCGGTTTGTTAAGTCAGATGTGAAATCCCCGGGCTCAACCTGGGAACTGCATCTGATACTGGCAAGCTTGAGTCTCGTAGAGG";

    fn lenient(max_mismatch: usize) -> MergeParams {
        MergeParams {
            lenient: true,
            max_mismatch,
            ..MergeParams::default()
        }
    }

    #[test]
    fn test_exact_overlap() {
        let fwd = &AMPLICON[..100];
        let rev = &AMPLICON[60..];
        let q = vec![30.0; 100];
        let (seq, overlap, mismatches) =
            merge_centers(fwd, &q, rev, &q, &MergeParams::default()).unwrap();
        assert_eq!(seq, AMPLICON);
        assert_eq!(overlap, 40);
        assert_eq!(mismatches, 0);
        assert_eq!(seq.len(), fwd.len() + rev.len() - overlap);
    }

    #[test]
    fn test_short_or_mismatched_overlap_rejected() {
        let q = vec![30.0; 200];
        // Overlap of 10 is below the minimum of 12.
        assert!(merge_centers(&AMPLICON[..70], &q, &AMPLICON[60..], &q, &MergeParams::default())
            .is_none());

        let mut rev = AMPLICON[60..].to_vec();
        rev[5] = if rev[5] == b'A' { b'C' } else { b'A' };
        assert!(merge_centers(&AMPLICON[..100], &q, &rev, &q, &MergeParams::default()).is_none());

        // Lenient mode takes the higher quality base.
        let mut rev_q = vec![30.0; rev.len()];
        rev_q[5] = 10.0;
        let (seq, overlap, mismatches) =
            merge_centers(&AMPLICON[..100], &q, &rev, &rev_q, &lenient(1)).unwrap();
        assert_eq!((overlap, mismatches), (40, 1));
        assert_eq!(seq, AMPLICON);
        rev_q[5] = 40.0;
        let (seq, _, _) = merge_centers(&AMPLICON[..100], &q, &rev, &rev_q, &lenient(1)).unwrap();
        assert_eq!(seq[65], rev[5]);
        // Without lenient mode the mismatch limit is ignored.
        let strict = MergeParams {
            max_mismatch: 1,
            ..MergeParams::default()
        };
        assert!(merge_centers(&AMPLICON[..100], &q, &rev, &rev_q, &strict).is_none());
    }

    #[test]
    fn test_concatenate() {
        let params = MergeParams {
            just_concatenate: true,
            ..MergeParams::default()
        };
        let (seq, overlap, _) = merge_centers(b"AAAA", &[30.0; 4], b"CC", &[30.0; 2], &params).unwrap();
        assert_eq!(seq, b"AAAANNNNNNNNNNCC");
        assert_eq!(overlap, 0);
    }
}
