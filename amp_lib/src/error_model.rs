//! Quality-conditioned substitution rates and their estimation from
//! observed transitions.

use crate::error::Diagnostic;
use crate::sequence::NUM_BASES;
use amp_fastq::read::phred_to_prob;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use stats::{isotonic_non_increasing, loess_fit, DEFAULT_SPAN};

/// Smallest substitution rate a learned model will hold.
pub const MIN_ERR_RATE: f64 = 1e-7;
/// Largest substitution rate a learned model will hold.
pub const MAX_ERR_RATE: f64 = 0.25;

const BASES: [char; NUM_BASES] = ['A', 'C', 'G', 'T'];

#[inline]
const fn transition(from: usize, to: usize) -> usize {
    from * NUM_BASES + to
}

/// Name of a transition in the form `A2C`.
pub fn transition_name(from: usize, to: usize) -> String {
    format!("{}2{}", BASES[from], BASES[to])
}

/// Probability of reading base `to` when the true base is `from`, for every
/// Phred score from 0 up to `max_quality`. Scores above `max_quality` use the
/// rates of `max_quality`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorModel {
    max_quality: u8,
    /// One row per transition, indexed `from * 4 + to`, one column per quality.
    rates: Vec<Vec<f64>>,
}

impl ErrorModel {
    fn filled(max_quality: u8, f: impl Fn(usize, usize, u8) -> f64) -> ErrorModel {
        let rates = (0..NUM_BASES * NUM_BASES)
            .map(|t| {
                (0..=max_quality)
                    .map(|q| f(t / NUM_BASES, t % NUM_BASES, q))
                    .collect()
            })
            .collect();
        ErrorModel { max_quality, rates }
    }

    /// The maximally pessimistic starting point: every transition has rate 1,
    /// so no difference between sequences is ever surprising and the first
    /// round of denoising keeps everything in one cluster per k-mer
    /// neighbourhood. Rows of this model do not sum to one.
    pub fn pessimistic(max_quality: u8) -> ErrorModel {
        ErrorModel::filled(max_quality, |_, _, _| 1.0)
    }

    /// Rates implied by the Phred scores alone, spread evenly over the three
    /// possible substitutions.
    pub fn from_phred(max_quality: u8) -> ErrorModel {
        ErrorModel::filled(max_quality, |from, to, q| {
            let p = phred_to_prob(q).clamp(MIN_ERR_RATE, 3.0 * MAX_ERR_RATE);
            if from == to {
                1.0 - p
            } else {
                p / 3.0
            }
        })
    }

    pub fn max_quality(&self) -> u8 {
        self.max_quality
    }

    pub fn num_qualities(&self) -> usize {
        usize::from(self.max_quality) + 1
    }

    #[inline]
    pub fn rate(&self, from: usize, to: usize, q: u8) -> f64 {
        self.rates[transition(from, to)][usize::from(q.min(self.max_quality))]
    }

    /// Rates of one transition across all qualities.
    pub fn rates(&self, from: usize, to: usize) -> &[f64] {
        &self.rates[transition(from, to)]
    }

    /// Largest absolute difference between corresponding rates.
    pub fn max_abs_diff(&self, other: &ErrorModel) -> f64 {
        if self.max_quality != other.max_quality {
            return f64::INFINITY;
        }
        self.rates
            .iter()
            .flatten()
            .zip(other.rates.iter().flatten())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }

    /// Re-estimate the rates from observed transition counts.
    ///
    /// Per true base and quality the raw rate is `(count + 1) / (total + 4)`.
    /// Each substitution is then smoothed by a local regression of its log10
    /// rate on quality, weighted by the number of observations. Qualities
    /// without observations take the smoothed rate of the nearest observed
    /// quality and are reported as gaps. Rates are clamped to
    /// [`MIN_ERR_RATE`, `MAX_ERR_RATE`] and made non-increasing in quality.
    /// The rate of reading the true base is one minus the substitution rates.
    pub fn estimate(counts: &TransitionCounts) -> (ErrorModel, Vec<Diagnostic>) {
        let nq = counts.num_qualities();
        let max_quality = (nq - 1) as u8;
        let fallback = ErrorModel::from_phred(max_quality);
        let mut rates = vec![vec![0.0; nq]; NUM_BASES * NUM_BASES];

        for from in 0..NUM_BASES {
            let totals: Vec<f64> = (0..nq).map(|q| counts.total(from, q)).collect();
            let observed: Vec<usize> = (0..nq).filter(|&q| totals[q] > 0.0).collect();
            if observed.is_empty() {
                debug!("no observations of true base {}, using Phred rates", BASES[from]);
                for to in 0..NUM_BASES {
                    rates[transition(from, to)] = fallback.rates(from, to).to_vec();
                }
                continue;
            }
            let x: Vec<f64> = observed.iter().map(|&q| q as f64).collect();
            let w: Vec<f64> = observed.iter().map(|&q| totals[q]).collect();
            let nearest = nearest_observed(&observed, nq);
            let iso_weights: Vec<f64> = totals.iter().map(|&t| t.max(1.0)).collect();

            let mut off_diagonal = vec![0.0; nq];
            for to in (0..NUM_BASES).filter(|&to| to != from) {
                let y: Vec<f64> = observed
                    .iter()
                    .map(|&q| ((counts.get(from, to, q) + 1.0) / (totals[q] + 4.0)).log10())
                    .collect();
                let fit = loess_fit(&x, &y, &w, DEFAULT_SPAN);
                let full: Vec<f64> = (0..nq)
                    .map(|q| 10f64.powf(fit[nearest[q]]).clamp(MIN_ERR_RATE, MAX_ERR_RATE))
                    .collect();
                let smoothed = isotonic_non_increasing(&full, &iso_weights);
                for (sum, r) in off_diagonal.iter_mut().zip(&smoothed) {
                    *sum += r;
                }
                rates[transition(from, to)] = smoothed;
            }
            rates[transition(from, from)] = off_diagonal.iter().map(|s| 1.0 - s).collect();
        }

        let diagnostics = quality_gaps(counts);
        if !diagnostics.is_empty() {
            let listed: Vec<String> = diagnostics.iter().map(ToString::to_string).collect();
            warn!(
                "{} quality scores had no observations: {}",
                diagnostics.len(),
                listed.join("; ")
            );
        }
        (ErrorModel { max_quality, rates }, diagnostics)
    }
}

/// For every quality, the position in `observed` of the nearest observed
/// quality. Ties go to the higher quality.
fn nearest_observed(observed: &[usize], nq: usize) -> Vec<usize> {
    (0..nq)
        .map(|q| {
            let (pos, _) = observed
                .iter()
                .enumerate()
                .min_by_key(|&(_, &o)| (o.abs_diff(q), std::cmp::Reverse(o)))
                .unwrap_or((0, &0));
            pos
        })
        .collect()
}

/// Qualities with no observations for any true base, paired with the nearest
/// quality that has some.
fn quality_gaps(counts: &TransitionCounts) -> Vec<Diagnostic> {
    let nq = counts.num_qualities();
    let observed: Vec<usize> = (0..nq)
        .filter(|&q| (0..NUM_BASES).any(|from| counts.total(from, q) > 0.0))
        .collect();
    if observed.is_empty() {
        return Vec::new();
    }
    let nearest = nearest_observed(&observed, nq);
    (0..nq)
        .filter(|q| observed.binary_search(q).is_err())
        .map(|q| Diagnostic::QualityGap {
            quality: q as u8,
            used: observed[nearest[q]] as u8,
        })
        .collect()
}

/// Read-weighted counts of (true base, read base, quality) observations.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionCounts {
    nq: usize,
    counts: Vec<f64>,
}

impl TransitionCounts {
    pub fn new(max_quality: u8) -> TransitionCounts {
        let nq = usize::from(max_quality) + 1;
        TransitionCounts {
            nq,
            counts: vec![0.0; NUM_BASES * NUM_BASES * nq],
        }
    }

    pub fn num_qualities(&self) -> usize {
        self.nq
    }

    #[inline]
    fn index(&self, from: usize, to: usize, q: usize) -> usize {
        transition(from, to) * self.nq + q.min(self.nq - 1)
    }

    pub fn add(&mut self, from: usize, to: usize, q: u8, weight: f64) {
        let i = self.index(from, to, usize::from(q));
        self.counts[i] += weight;
    }

    pub fn get(&self, from: usize, to: usize, q: usize) -> f64 {
        self.counts[self.index(from, to, q)]
    }

    /// All observations of true base `from` at quality `q`.
    pub fn total(&self, from: usize, q: usize) -> f64 {
        (0..NUM_BASES).map(|to| self.get(from, to, q)).sum()
    }

    pub fn merge(&mut self, other: &TransitionCounts) {
        assert_eq!(self.nq, other.nq);
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
    }

    /// Total weight of all observations that were substitutions.
    pub fn substitutions(&self) -> f64 {
        let mut sum = 0.0;
        for from in 0..NUM_BASES {
            for to in (0..NUM_BASES).filter(|&to| to != from) {
                sum += (0..self.nq).map(|q| self.get(from, to, q)).sum::<f64>();
            }
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Counts drawn from Phred-calibrated rates at qualities `lo..=hi`.
    fn phred_counts(max_quality: u8, lo: u8, hi: u8, per_bucket: f64) -> TransitionCounts {
        let mut counts = TransitionCounts::new(max_quality);
        for q in lo..=hi {
            let p = phred_to_prob(q);
            for from in 0..NUM_BASES {
                for to in 0..NUM_BASES {
                    let frac = if from == to { 1.0 - p } else { p / 3.0 };
                    counts.add(from, to, q, (frac * per_bucket).round());
                }
            }
        }
        counts
    }

    fn assert_valid(model: &ErrorModel) {
        for from in 0..NUM_BASES {
            for q in 0..=model.max_quality() {
                let row: f64 = (0..NUM_BASES).map(|to| model.rate(from, to, q)).sum();
                assert!((row - 1.0).abs() < 1e-9, "row {from} q{q} sums to {row}");
            }
            for to in (0..NUM_BASES).filter(|&to| to != from) {
                let rates = model.rates(from, to);
                assert!(rates.windows(2).all(|w| w[1] <= w[0]), "{rates:?}");
                assert!(rates
                    .iter()
                    .all(|&r| (MIN_ERR_RATE..=MAX_ERR_RATE).contains(&r)));
            }
        }
    }

    #[test]
    fn test_pessimistic_and_phred() {
        let p = ErrorModel::pessimistic(41);
        assert_eq!(p.rate(0, 3, 17), 1.0);
        assert_eq!(p.num_qualities(), 42);
        let ph = ErrorModel::from_phred(41);
        assert!((ph.rate(0, 1, 20) - 0.01 / 3.0).abs() < 1e-12);
        assert!((ph.rate(2, 2, 20) - 0.99).abs() < 1e-12);
        assert_eq!(ph.rate(0, 1, 60), ph.rate(0, 1, 41));
        assert!(p.max_abs_diff(&ph) > 0.9);
        assert_eq!(ph.max_abs_diff(&ph), 0.0);
    }

    #[test]
    fn test_estimate_recovers_phred_rates() {
        let counts = phred_counts(41, 2, 41, 1e7);
        let (model, gaps) = ErrorModel::estimate(&counts);
        assert_valid(&model);
        // Only qualities 0 and 1 were never observed.
        assert_eq!(
            gaps,
            vec![
                Diagnostic::QualityGap { quality: 0, used: 2 },
                Diagnostic::QualityGap { quality: 1, used: 2 },
            ]
        );
        for q in [10u8, 20, 30] {
            let expected = phred_to_prob(q) / 3.0;
            let got = model.rate(0, 2, q);
            assert!(
                (got.log10() - expected.log10()).abs() < 0.3,
                "q{q}: {got} vs {expected}"
            );
        }
    }

    #[test]
    fn test_estimate_without_substitutions_hits_floor() {
        let mut counts = TransitionCounts::new(41);
        for from in 0..NUM_BASES {
            counts.add(from, from, 38, 1e9);
        }
        let (model, gaps) = ErrorModel::estimate(&counts);
        assert_valid(&model);
        assert_eq!(gaps.len(), 41);
        assert!(model.rate(1, 0, 38) < 1e-6);
        assert!(model.rate(1, 0, 2) < 1e-6);
    }

    #[test]
    fn test_estimate_fills_unobserved_base_from_phred() {
        let mut counts = TransitionCounts::new(41);
        counts.add(0, 0, 30, 1000.0);
        counts.add(0, 1, 30, 1.0);
        let (model, _) = ErrorModel::estimate(&counts);
        assert_valid(&model);
        assert_eq!(model.rates(3, 1), ErrorModel::from_phred(41).rates(3, 1));
    }

    #[test]
    fn test_counts_merge() {
        let mut a = TransitionCounts::new(10);
        a.add(0, 1, 5, 2.0);
        let mut b = TransitionCounts::new(10);
        b.add(0, 1, 5, 3.0);
        b.add(0, 0, 50, 1.0);
        a.merge(&b);
        assert_eq!(a.get(0, 1, 5), 5.0);
        assert_eq!(a.get(0, 0, 10), 1.0);
        assert_eq!(a.total(0, 5), 5.0);
        assert_eq!(a.substitutions(), 5.0);
    }
}
