//! Collapse identical reads into unique sequences.

use amp_fastq::Read;
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

/// A distinct sequence with the number of reads carrying it and their mean
/// quality at each position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniqueSequence {
    pub seq: Vec<u8>,
    pub abundance: u64,
    /// Indices, in input order, of the reads carrying this sequence.
    pub reads: Vec<usize>,
    pub mean_qual: Vec<f64>,
}

impl UniqueSequence {
    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Mean quality at `pos`, rounded to a whole Phred score.
    pub fn rounded_qual(&self, pos: usize) -> u8 {
        self.mean_qual[pos].round().clamp(0.0, f64::from(u8::MAX)) as u8
    }
}

/// The unique sequences of one sample and direction, most abundant first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dereplicated {
    pub uniques: Vec<UniqueSequence>,
    num_reads: usize,
}

impl Dereplicated {
    pub fn num_reads(&self) -> usize {
        self.num_reads
    }

    /// Total number of bases over all reads.
    pub fn num_bases(&self) -> u64 {
        self.uniques
            .iter()
            .map(|u| u.abundance * u.len() as u64)
            .sum()
    }

    /// For each read index, the index of its unique sequence.
    pub fn read_map(&self) -> Vec<usize> {
        let mut map = vec![usize::MAX; self.num_reads];
        for (i, u) in self.uniques.iter().enumerate() {
            for &r in &u.reads {
                map[r] = i;
            }
        }
        map
    }
}

struct Accumulator {
    first_seen: usize,
    reads: Vec<usize>,
    qual_sum: Vec<f64>,
    weight: u64,
}

fn finish(acc: FxHashMap<Vec<u8>, Accumulator>, num_reads: usize) -> Dereplicated {
    let mut uniques: Vec<_> = acc
        .into_iter()
        .map(|(seq, a)| {
            let abundance = a.weight;
            let mean_qual = a.qual_sum.iter().map(|&s| s / abundance as f64).collect();
            (
                a.first_seen,
                UniqueSequence {
                    seq,
                    abundance,
                    reads: a.reads,
                    mean_qual,
                },
            )
        })
        .collect();
    uniques.sort_by(|(fa, a), (fb, b)| b.abundance.cmp(&a.abundance).then(fa.cmp(fb)));
    Dereplicated {
        uniques: uniques.into_iter().map(|(_, u)| u).collect(),
        num_reads,
    }
}

/// Dereplicate the reads of one sample and direction. Sequences are compared
/// exactly; the output is sorted by abundance, ties in first-seen order.
pub fn dereplicate<'a>(reads: impl IntoIterator<Item = &'a Read>) -> Dereplicated {
    let mut acc: FxHashMap<Vec<u8>, Accumulator> = FxHashMap::default();
    let mut num_reads = 0;
    for (i, read) in reads.into_iter().enumerate() {
        num_reads += 1;
        let entry = acc
            .entry(read.seq().to_ascii_uppercase())
            .or_insert_with(|| Accumulator {
                first_seen: i,
                reads: Vec::new(),
                qual_sum: vec![0.0; read.len()],
                weight: 0,
            });
        entry.reads.push(i);
        entry.weight += 1;
        for (s, &q) in entry.qual_sum.iter_mut().zip(read.qual()) {
            *s += f64::from(q);
        }
    }
    finish(acc, num_reads)
}

/// Dereplicate sequences that already carry abundances, e.g. to pool samples.
/// Mean qualities are combined weighted by abundance. Read indices are
/// renumbered as if the uniques' reads had been concatenated in order.
pub fn dereplicate_uniques(uniques: &[UniqueSequence]) -> Dereplicated {
    let mut acc: FxHashMap<Vec<u8>, Accumulator> = FxHashMap::default();
    let mut offset = 0;
    for (i, u) in uniques.iter().enumerate() {
        let entry = acc
            .entry(u.seq.to_ascii_uppercase())
            .or_insert_with(|| Accumulator {
                first_seen: i,
                reads: Vec::new(),
                qual_sum: vec![0.0; u.len()],
                weight: 0,
            });
        let n = u.abundance as usize;
        entry.reads.extend(offset..offset + n);
        offset += n;
        entry.weight += u.abundance;
        for (s, &q) in entry.qual_sum.iter_mut().zip(&u.mean_qual) {
            *s += q * u.abundance as f64;
        }
    }
    finish(acc, offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn read(seq: &[u8], q: u8) -> Read {
        Read::new(seq.to_vec(), vec![q; seq.len()])
    }

    #[test]
    fn test_empty() {
        let d = dereplicate(&[]);
        assert!(d.uniques.is_empty());
        assert_eq!(d.num_reads(), 0);
    }

    #[test]
    fn test_dereplicate() {
        let reads = vec![
            read(b"AAAA", 30),
            read(b"CCCC", 20),
            read(b"cccc", 40),
            read(b"GGGG", 10),
            read(b"AAAA", 10),
            read(b"TTTT", 10),
        ];
        let d = dereplicate(&reads);
        let seqs: Vec<_> = d.uniques.iter().map(|u| u.seq.as_slice()).collect();
        // AAAA and CCCC tie on abundance; AAAA was seen first.
        assert_eq!(seqs, vec![&b"AAAA"[..], b"CCCC", b"GGGG", b"TTTT"]);
        assert_eq!(d.uniques[0].abundance, 2);
        assert_eq!(d.uniques[0].reads, vec![0, 4]);
        assert_eq!(d.uniques[1].mean_qual, vec![30.0; 4]);
        assert_eq!(d.read_map(), vec![0, 1, 1, 2, 0, 3]);
        assert_eq!(d.num_bases(), 24);
    }

    proptest! {
        #[test]
        fn prop_dereplicate_is_idempotent(
            seqs in proptest::collection::vec("[ACGT]{4}", 0..40),
        ) {
            let reads: Vec<Read> = seqs.iter().map(|s| read(s.as_bytes(), 30)).collect();
            let once = dereplicate(&reads);
            let twice = dereplicate_uniques(&once.uniques);
            let key = |d: &Dereplicated| -> Vec<(Vec<u8>, u64, Vec<f64>)> {
                d.uniques.iter().map(|u| (u.seq.clone(), u.abundance, u.mean_qual.clone())).collect()
            };
            prop_assert_eq!(key(&once), key(&twice));
            prop_assert_eq!(twice.num_reads(), reads.len());
        }
    }
}
