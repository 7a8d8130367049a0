//! De novo removal of bimeras: sequences formed by joining the start of one
//! more abundant sequence to the end of another.

use crate::seqtab::SequenceTable;
use crate::sequence::{common_prefix, common_suffix, hamming};
use amp_params::{ChimeraMethod, ChimeraParams};
use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;

/// Share of chimeras with more than one valid parent pair above which a
/// warning is logged.
const AMBIGUITY_WARN_RATE: f64 = 0.1;

/// Parents of a bimera: `left` supplies the start, `right` the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BimeraCall {
    pub left: usize,
    pub right: usize,
    /// More than one parent pair explains the candidate.
    pub ambiguous: bool,
}

/// Prefix length shared with `parent` when one mismatch is allowed.
fn prefix_one_off(seq: &[u8], parent: &[u8]) -> usize {
    let first = common_prefix(seq, parent);
    if first >= seq.len().min(parent.len()) {
        return first;
    }
    first + 1 + common_prefix(&seq[first + 1..], &parent[first + 1..])
}

fn suffix_one_off(seq: &[u8], parent: &[u8]) -> usize {
    let first = common_suffix(seq, parent);
    if first >= seq.len().min(parent.len()) {
        return first;
    }
    let (s, p) = (seq.len() - first - 1, parent.len() - first - 1);
    first + 1 + common_suffix(&seq[..s], &parent[..p])
}

/// Test whether `candidate` is an exact join of the start of one parent and
/// the end of another, or, with `allow_one_off`, such a join with one
/// mismatch where both parents differ from the candidate at
/// `min_one_off_distance` or more positions. Each parent must contribute at
/// least one base, so a candidate that is a prefix or suffix of a single
/// parent is never a bimera.
///
/// Among valid pairs the one with the largest summed abundance is returned,
/// ties to the lower indices.
pub fn find_bimera(
    candidate: &[u8],
    parents: &[(usize, &[u8], u64)],
    params: &ChimeraParams,
) -> Option<BimeraCall> {
    let len = candidate.len();
    let left: Vec<usize> = parents.iter().map(|p| common_prefix(candidate, p.1)).collect();
    let right: Vec<usize> = parents.iter().map(|p| common_suffix(candidate, p.1)).collect();

    // A prefix or suffix of a single parent needs no breakpoint.
    if left.iter().chain(&right).any(|&n| n >= len) {
        return None;
    }

    let mut valid: Vec<(usize, usize)> = Vec::new();
    for a in 0..parents.len() {
        for b in (0..parents.len()).filter(|&b| b != a) {
            if left[a] + right[b] >= len {
                valid.push((a, b));
            }
        }
    }

    if valid.is_empty() && params.allow_one_off {
        let far: Vec<bool> = parents
            .iter()
            .map(|p| hamming(candidate, p.1) >= params.min_one_off_parent_distance)
            .collect();
        let left1: Vec<usize> = parents.iter().map(|p| prefix_one_off(candidate, p.1)).collect();
        let right1: Vec<usize> = parents.iter().map(|p| suffix_one_off(candidate, p.1)).collect();
        for a in (0..parents.len()).filter(|&a| far[a]) {
            for b in (0..parents.len()).filter(|&b| b != a && far[b]) {
                let joins_left = left1[a] < len && left1[a] + right[b] >= len;
                let joins_right = right1[b] < len && left[a] + right1[b] >= len;
                if joins_left || joins_right {
                    valid.push((a, b));
                }
            }
        }
    }

    let ambiguous = valid.len() > 1;
    valid
        .into_iter()
        .max_by(|&(a1, b1), &(a2, b2)| {
            (parents[a1].2 + parents[b1].2)
                .cmp(&(parents[a2].2 + parents[b2].2))
                .then((a2, b2).cmp(&(a1, b1)))
        })
        .map(|(a, b)| BimeraCall {
            left: parents[a].0,
            right: parents[b].0,
            ambiguous,
        })
}

/// Call bimeras within one abundance vector. Candidates are visited from
/// most to least abundant; only sequences already found not to be chimeric,
/// at least `min_fold_parent_over_abundance` times as abundant as the
/// candidate and at least `min_parent_abundance`, serve as parents.
/// Returns per-column calls.
pub fn call_bimeras(
    sequences: &[Vec<u8>],
    abundances: &[u64],
    params: &ChimeraParams,
) -> Vec<Option<BimeraCall>> {
    let mut order: Vec<usize> = (0..sequences.len()).filter(|&i| abundances[i] > 0).collect();
    order.sort_by(|&a, &b| abundances[b].cmp(&abundances[a]).then(a.cmp(&b)));

    let mut calls = vec![None; sequences.len()];
    let mut confirmed: Vec<usize> = Vec::new();
    for cand in order {
        let min_parent = (params.min_fold_parent_over_abundance * abundances[cand] as f64)
            .max(params.min_parent_abundance as f64);
        let parents: Vec<(usize, &[u8], u64)> = confirmed
            .iter()
            .filter(|&&p| abundances[p] as f64 >= min_parent)
            .map(|&p| (p, sequences[p].as_slice(), abundances[p]))
            .collect();
        match find_bimera(&sequences[cand], &parents, params) {
            Some(call) => calls[cand] = Some(call),
            None => confirmed.push(cand),
        }
    }
    calls
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct ChimeraStats {
    pub input_sequences: usize,
    pub chimeric_sequences: usize,
    pub input_reads: u64,
    pub retained_reads: u64,
    /// Chimera calls with more than one valid parent pair.
    pub ambiguous: usize,
}

impl ChimeraStats {
    /// Fraction of reads kept.
    pub fn retained_fraction(&self) -> f64 {
        if self.input_reads == 0 {
            1.0
        } else {
            self.retained_reads as f64 / self.input_reads as f64
        }
    }
}

fn per_sample_calls(table: &SequenceTable, params: &ChimeraParams) -> Vec<Vec<Option<BimeraCall>>> {
    (0..table.num_samples())
        .into_par_iter()
        .map(|row| call_bimeras(table.sequences(), &table.row(row), params))
        .collect()
}

/// Remove bimeras from the table by the configured method. The column with
/// the largest total abundance is never removed.
pub fn remove_bimeras(table: &SequenceTable, params: &ChimeraParams) -> (SequenceTable, ChimeraStats) {
    let totals = table.column_totals();
    let n = table.num_sequences();
    let top = (0..n).max_by(|&a, &b| totals[a].cmp(&totals[b]).then(b.cmp(&a)));

    let mut ambiguous = 0;
    let filtered = match params.method {
        ChimeraMethod::Pooled => {
            let calls = call_bimeras(table.sequences(), &totals, params);
            ambiguous = calls.iter().flatten().filter(|c| c.ambiguous).count();
            table.select_columns(|c, _| calls[c].is_none() || Some(c) == top)
        }
        ChimeraMethod::Consensus => {
            let calls = per_sample_calls(table, params);
            let mut chimeric = vec![false; n];
            for (col, flag) in chimeric.iter_mut().enumerate() {
                let present = (0..table.num_samples())
                    .filter(|&row| table.get(row, col) > 0)
                    .count();
                let flagged: Vec<&BimeraCall> =
                    calls.iter().filter_map(|row| row[col].as_ref()).collect();
                let nflag = flagged.len();
                let threshold = present.saturating_sub(params.ignore_n_negatives) as f64
                    * params.min_sample_fraction;
                *flag = Some(col) != top
                    && nflag > 0
                    && (nflag >= present || nflag as f64 >= threshold);
                if *flag && flagged.iter().any(|c| c.ambiguous) {
                    ambiguous += 1;
                }
            }
            table.select_columns(|c, _| !chimeric[c])
        }
        ChimeraMethod::PerSample => {
            let calls = per_sample_calls(table, params);
            let mut cells = Vec::new();
            for (row, row_calls) in calls.iter().enumerate() {
                for (col, call) in row_calls.iter().enumerate() {
                    if let Some(call) = call {
                        if Some(col) != top {
                            cells.push((row, col));
                            ambiguous += usize::from(call.ambiguous);
                        }
                    }
                }
            }
            table.zero_cells(&cells)
        }
    };

    let stats = ChimeraStats {
        input_sequences: n,
        chimeric_sequences: n - filtered.num_sequences(),
        input_reads: table.total(),
        retained_reads: filtered.total(),
        ambiguous,
    };
    info!(
        "removed {} of {} sequences as bimeras, {:.2}% of reads retained",
        stats.chimeric_sequences,
        stats.input_sequences,
        100.0 * stats.retained_fraction()
    );
    if stats.chimeric_sequences > 0 {
        let rate = stats.ambiguous as f64 / stats.chimeric_sequences as f64;
        if rate > AMBIGUITY_WARN_RATE {
            warn!(
                "{} of {} bimeras had more than one candidate parent pair; \
                 the most abundant pair was used",
                stats.ambiguous, stats.chimeric_sequences
            );
        }
    }
    (filtered, stats)
}
