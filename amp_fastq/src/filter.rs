//! Quality filtering and truncation of read pairs.
//!
//! Each mate is processed in a fixed order: remove `trim_left` bases, truncate
//! at the first base with quality at or below `trunc_q`, enforce `trunc_len`
//! (shorter reads fail, longer reads are cut), then check `min_len`, `max_n`
//! and `max_ee`. A pair passes only when both mates pass.

use crate::error::FastqError;
use crate::read::{expected_errors, Read, ReadPair, WhichRead};
use amp_params::FilterParams;
use serde::{Deserialize, Serialize};

/// Reads entering and leaving the filter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStats {
    pub reads_in: u64,
    pub reads_out: u64,
}

impl FilterStats {
    pub fn merge(&mut self, other: FilterStats) {
        self.reads_in += other.reads_in;
        self.reads_out += other.reads_out;
    }
}

/// Trim and test one mate in place. Returns false if the mate fails.
pub fn filter_read(read: &mut Read, which: WhichRead, params: &FilterParams) -> bool {
    let i = which.index();
    let trim_left = params.trim_left[i];
    read.narrow(trim_left, read.len());

    if let Some(pos) = read.qual().iter().position(|&q| q <= params.trunc_q) {
        read.narrow(0, pos);
    }

    let trunc_len = params.trunc_len[i];
    if trunc_len > 0 {
        if read.len() < trunc_len {
            return false;
        }
        read.narrow(0, trunc_len);
    }

    read.len() >= params.min_len.max(1)
        && read.n_count() <= params.max_n
        && expected_errors(read.qual()) <= params.max_ee[i]
}

/// Filter one pair. Returns the trimmed pair if both mates pass.
pub fn filter_pair(mut pair: ReadPair, params: &FilterParams) -> Option<ReadPair> {
    for which in WhichRead::both() {
        if !filter_read(pair.read_mut(which), which, params) {
            return None;
        }
    }
    Some(pair)
}

/// Filter a stream of pairs, stopping at the first input error.
pub fn filter_pairs<I>(
    pairs: I,
    params: &FilterParams,
) -> Result<(Vec<ReadPair>, FilterStats), FastqError>
where
    I: IntoIterator<Item = Result<ReadPair, FastqError>>,
{
    let mut stats = FilterStats::default();
    let mut kept = Vec::new();
    for pair in pairs {
        stats.reads_in += 1;
        if let Some(pair) = filter_pair(pair?, params) {
            stats.reads_out += 1;
            kept.push(pair);
        }
    }
    Ok((kept, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn read(seq: &[u8], q: u8) -> Read {
        Read::new(seq.to_vec(), vec![q; seq.len()])
    }

    fn lenient() -> FilterParams {
        FilterParams {
            min_len: 1,
            ..FilterParams::default()
        }
    }

    #[test]
    fn test_trim_left_then_trunc_len() {
        let params = FilterParams {
            trim_left: [2, 0],
            trunc_len: [4, 0],
            ..lenient()
        };
        let mut r = read(b"AAACGTTT", 30);
        assert!(filter_read(&mut r, WhichRead::Forward, &params));
        assert_eq!(r.seq(), b"ACGT");

        let mut short = read(b"AAACG", 30);
        assert!(!filter_read(&mut short, WhichRead::Forward, &params));
    }

    #[test]
    fn test_trunc_q() {
        let mut r = Read::new(b"ACGTACGT".to_vec(), vec![30, 30, 30, 2, 30, 30, 30, 30]);
        assert!(filter_read(&mut r, WhichRead::Reverse, &lenient()));
        assert_eq!(r.seq(), b"ACG");

        // Truncation by quality can make the read fail truncLen.
        let params = FilterParams {
            trunc_len: [0, 5],
            ..lenient()
        };
        let mut r = Read::new(b"ACGTACGT".to_vec(), vec![30, 30, 30, 2, 30, 30, 30, 30]);
        assert!(!filter_read(&mut r, WhichRead::Reverse, &params));
    }

    #[test]
    fn test_max_n_and_max_ee() {
        let mut r = read(b"ACNT", 30);
        assert!(!filter_read(&mut r, WhichRead::Forward, &lenient()));

        let params = FilterParams {
            max_ee: [0.05, 0.05],
            ..lenient()
        };
        // 10 bases at Q20 is 0.1 expected errors.
        let mut r = read(b"ACGTACGTAC", 20);
        assert!(!filter_read(&mut r, WhichRead::Forward, &params));
        let mut r = read(b"ACGTACGTAC", 30);
        assert!(filter_read(&mut r, WhichRead::Forward, &params));
    }

    #[test]
    fn test_pair_requires_both_mates() {
        let good = ReadPair::new(b"a".to_vec(), read(b"ACGT", 30), read(b"ACGT", 30));
        let bad = ReadPair::new(b"b".to_vec(), read(b"ACGT", 30), read(b"ANGT", 30));
        let (kept, stats) = filter_pairs(vec![Ok(good.clone()), Ok(bad)], &lenient()).unwrap();
        assert_eq!(kept, vec![good]);
        assert_eq!(
            stats,
            FilterStats {
                reads_in: 2,
                reads_out: 1
            }
        );
    }

    proptest! {
        #[test]
        fn prop_filtered_reads_respect_limits(
            qual in proptest::collection::vec(0u8..42, 0..60),
            trunc_len in 0usize..40,
            trim_left in 0usize..10,
        ) {
            let params = FilterParams {
                trunc_len: [trunc_len, 0],
                trim_left: [trim_left, 0],
                max_ee: [2.0, 2.0],
                ..FilterParams::default()
            };
            let mut r = Read::new(vec![b'A'; qual.len()], qual);
            if filter_read(&mut r, WhichRead::Forward, &params) {
                prop_assert!(r.len() >= params.min_len);
                prop_assert!(trunc_len == 0 || r.len() == trunc_len);
                prop_assert!(r.qual().iter().all(|&q| q > params.trunc_q));
                prop_assert!(expected_errors(r.qual()) <= 2.0);
            }
        }
    }
}
