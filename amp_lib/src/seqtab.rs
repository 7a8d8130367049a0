//! The sample-by-sequence abundance table.

use crate::merge::MergedVariant;
use amp_params::ColumnOrder;
use fxhash::FxHashMap;
use sprs::{CsMat, TriMat};

/// Sparse abundance matrix, one row per sample in input order and one column
/// per distinct sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceTable {
    samples: Vec<String>,
    sequences: Vec<Vec<u8>>,
    counts: CsMat<u64>,
}

impl SequenceTable {
    /// Aggregate the merged variants of every sample. Identical sequences
    /// share a column; columns are first ordered by first appearance and then
    /// by `order`.
    pub fn build(samples: &[(String, Vec<MergedVariant>)], order: ColumnOrder) -> SequenceTable {
        let mut columns: FxHashMap<&[u8], usize> = FxHashMap::default();
        let mut sequences: Vec<Vec<u8>> = Vec::new();
        let mut triplets = Vec::new();
        for (row, (_, variants)) in samples.iter().enumerate() {
            for v in variants {
                let col = *columns.entry(v.sequence.as_slice()).or_insert_with(|| {
                    sequences.push(v.sequence.clone());
                    sequences.len() - 1
                });
                triplets.push((row, col, v.abundance));
            }
        }
        let names = samples.iter().map(|(name, _)| name.clone()).collect();
        SequenceTable::from_triplets(names, sequences, triplets).ordered(order)
    }

    fn from_triplets(
        samples: Vec<String>,
        sequences: Vec<Vec<u8>>,
        triplets: Vec<(usize, usize, u64)>,
    ) -> SequenceTable {
        let mut tri = TriMat::new((samples.len(), sequences.len()));
        for (row, col, count) in triplets {
            if count > 0 {
                tri.add_triplet(row, col, count);
            }
        }
        SequenceTable {
            samples,
            sequences,
            counts: tri.to_csr(),
        }
    }

    fn triplets(&self) -> Vec<(usize, usize, u64)> {
        self.counts
            .outer_iterator()
            .enumerate()
            .flat_map(|(row, vec)| {
                vec.iter()
                    .map(move |(col, &count)| (row, col, count))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Rebuild with the columns in `order`; `order[i]` is the old index of new column `i`.
    /// Old columns missing from `order` are dropped.
    fn with_columns(&self, order: &[usize]) -> SequenceTable {
        let mut new_index = vec![usize::MAX; self.sequences.len()];
        for (new, &old) in order.iter().enumerate() {
            new_index[old] = new;
        }
        let triplets = self
            .triplets()
            .into_iter()
            .filter(|&(_, col, _)| new_index[col] != usize::MAX)
            .map(|(row, col, count)| (row, new_index[col], count))
            .collect();
        SequenceTable::from_triplets(
            self.samples.clone(),
            order.iter().map(|&i| self.sequences[i].clone()).collect(),
            triplets,
        )
    }

    /// Reorder columns. Ties keep the current order.
    pub fn ordered(self, order: ColumnOrder) -> SequenceTable {
        let mut cols: Vec<usize> = (0..self.sequences.len()).collect();
        match order {
            ColumnOrder::FirstSeen => return self,
            ColumnOrder::Abundance => {
                let totals = self.column_totals();
                cols.sort_by(|&a, &b| totals[b].cmp(&totals[a]));
            }
            ColumnOrder::Sequence => {
                cols.sort_by(|&a, &b| self.sequences[a].cmp(&self.sequences[b]));
            }
        }
        self.with_columns(&cols)
    }

    /// Keep only the columns for which `keep` is true. Abundances are not changed.
    pub fn select_columns(&self, keep: impl Fn(usize, &[u8]) -> bool) -> SequenceTable {
        let cols: Vec<usize> = (0..self.sequences.len())
            .filter(|&c| keep(c, &self.sequences[c]))
            .collect();
        self.with_columns(&cols)
    }

    /// Drop sequences whose length is outside `min..=max`.
    pub fn filter_lengths(&self, min: usize, max: usize) -> SequenceTable {
        self.select_columns(|_, seq| (min..=max).contains(&seq.len()))
    }

    /// Set the given (row, column) cells to zero and drop columns left empty.
    pub fn zero_cells(&self, cells: &[(usize, usize)]) -> SequenceTable {
        let zeroed: fxhash::FxHashSet<(usize, usize)> = cells.iter().copied().collect();
        let triplets: Vec<_> = self
            .triplets()
            .into_iter()
            .filter(|&(row, col, _)| !zeroed.contains(&(row, col)))
            .collect();
        let table = SequenceTable::from_triplets(
            self.samples.clone(),
            self.sequences.clone(),
            triplets,
        );
        let totals = table.column_totals();
        table.select_columns(|c, _| totals[c] > 0)
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn sequences(&self) -> &[Vec<u8>] {
        &self.sequences
    }

    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn num_sequences(&self) -> usize {
        self.sequences.len()
    }

    pub fn get(&self, row: usize, col: usize) -> u64 {
        self.counts.get(row, col).copied().unwrap_or(0)
    }

    /// Dense abundances of one sample.
    pub fn row(&self, row: usize) -> Vec<u64> {
        let mut dense = vec![0; self.sequences.len()];
        if let Some(vec) = self.counts.outer_view(row) {
            for (col, &count) in vec.iter() {
                dense[col] = count;
            }
        }
        dense
    }

    pub fn row_totals(&self) -> Vec<u64> {
        self.counts
            .outer_iterator()
            .map(|vec| vec.iter().map(|(_, &c)| c).sum())
            .collect()
    }

    pub fn column_totals(&self) -> Vec<u64> {
        let mut totals = vec![0; self.sequences.len()];
        for vec in self.counts.outer_iterator() {
            for (col, &count) in vec.iter() {
                totals[col] += count;
            }
        }
        totals
    }

    pub fn total(&self) -> u64 {
        self.row_totals().iter().sum()
    }
}
