//! Sequence-variant inference: divide unique sequences into clusters, each
//! anchored on a sequence that is too abundant to be explained as errors of
//! any other center.
//!
//! Starting from a single cluster around the most abundant sequence, every
//! round
//! 1. assigns each sequence to the center most likely to have produced it,
//! 2. computes for every non-center sequence the abundance p-value of its
//!    cluster's error hypothesis, and
//! 3. splits off the sequence with the smallest p-value as a new center if
//!    that p-value is below `omega_a`.
//!
//! Rounds end when no sequence qualifies, when `max_clusters` is reached, or
//! when the run is cancelled.
//!
//! Which sequences are compared is fixed: a sequence is compared with a
//! center unless k-mer screening is on and their 5-mer distance exceeds
//! `kdist_cutoff`, in which case the error probability is taken to be zero.

use crate::cancel::CancelToken;
use crate::compare::{compare, count_transitions, CompareSettings, Comparison};
use crate::derep::UniqueSequence;
use crate::error::Diagnostic;
use crate::error_model::{ErrorModel, TransitionCounts};
use crate::partition::Partition;
use crate::sequence::KmerProfile;
use amp_params::DenoiseParams;
use log::{debug, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use stats::{abundance_pvalue, poisson_upper_tail};

/// A denoised sequence variant with its reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DenoisedCluster {
    pub sequence: Vec<u8>,
    /// Index of the center among the input unique sequences.
    pub center: usize,
    pub abundance: u64,
    pub n_uniques: usize,
    pub birth_pvalue: f64,
    /// Observed over expected abundance of the center when it was split off.
    pub birth_fold: f64,
}

/// The partition found by [`denoise`] plus what is needed downstream.
#[derive(Debug, Clone)]
pub struct DenoiseResult {
    /// Clusters in the order they were created; the first holds the most
    /// abundant sequence.
    pub clusters: Vec<DenoisedCluster>,
    /// Cluster index of every input unique sequence.
    pub assignment: Vec<usize>,
    /// Abundance p-value of every input unique sequence under its final
    /// cluster. Centers have p-value 1.
    pub pvalues: Vec<f64>,
    /// Transitions of every comparable member relative to its center.
    pub transitions: TransitionCounts,
    pub rounds: usize,
    pub converged: bool,
    pub cancelled: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl DenoiseResult {
    /// Reads over all clusters.
    pub fn denoised_reads(&self) -> u64 {
        self.clusters.iter().map(|c| c.abundance).sum()
    }
}

impl From<&DenoiseParams> for CompareSettings {
    fn from(p: &DenoiseParams) -> Self {
        CompareSettings {
            use_kmers: p.use_kmers,
            kdist_cutoff: p.kdist_cutoff,
            band_size: p.band_size,
        }
    }
}

/// Per unique sequence, the comparison with its current center.
struct Assignment {
    lambda: Vec<f64>,
    differences: Vec<u32>,
}

struct Denoiser<'a> {
    uniques: &'a [UniqueSequence],
    kmers: Vec<KmerProfile>,
    model: &'a ErrorModel,
    params: &'a DenoiseParams,
    settings: CompareSettings,
    /// Per cluster, the sequences with a non-zero error probability, in index order.
    comparisons: Vec<Vec<(usize, Comparison)>>,
}

impl Denoiser<'_> {
    fn compare_all(&self, center: usize) -> Vec<(usize, Comparison)> {
        let c = &self.uniques[center];
        let ck = &self.kmers[center];
        (0..self.uniques.len())
            .into_par_iter()
            .filter_map(|u| {
                let cmp = compare(
                    c,
                    ck,
                    &self.uniques[u],
                    &self.kmers[u],
                    self.model,
                    &self.settings,
                );
                (cmp.lambda > 0.0).then_some((u, cmp))
            })
            .collect()
    }

    /// Move every sequence to the cluster with the highest error probability.
    /// Ties go to the cluster with more reads, then to the older cluster.
    /// Sequences no center can explain stay where they are.
    fn reassign(&self, partition: &mut Partition) -> Assignment {
        let n = self.uniques.len();
        let reads: Vec<u64> = partition.clusters().iter().map(|c| c.reads).collect();
        let mut best: Vec<Option<(usize, Comparison)>> = vec![None; n];
        for (c, list) in self.comparisons.iter().enumerate() {
            for &(u, cmp) in list {
                let better = match best[u] {
                    None => true,
                    Some((bc, b)) => match cmp.lambda.total_cmp(&b.lambda) {
                        Ordering::Greater => true,
                        Ordering::Less => false,
                        Ordering::Equal => reads[c] > reads[bc],
                    },
                };
                if better {
                    best[u] = Some((c, cmp));
                }
            }
        }

        let mut assignment = Assignment {
            lambda: vec![0.0; n],
            differences: vec![u32::MAX; n],
        };
        for (u, b) in best.into_iter().enumerate() {
            if partition.is_center(u) {
                let own = partition.cluster_of(u);
                if let Ok(i) = self.comparisons[own].binary_search_by_key(&u, |&(v, _)| v) {
                    assignment.lambda[u] = self.comparisons[own][i].1.lambda;
                }
                assignment.differences[u] = 0;
            } else if let Some((c, cmp)) = b {
                partition.assign(u, c);
                assignment.lambda[u] = cmp.lambda;
                assignment.differences[u] = cmp.differences;
            }
        }
        assignment
    }

    fn pvalues(&self, partition: &Partition, assignment: &Assignment) -> Vec<f64> {
        (0..self.uniques.len())
            .into_par_iter()
            .map(|u| {
                if partition.is_center(u) {
                    return 1.0;
                }
                let expected = self.expected(partition, assignment, u);
                let abundance = self.uniques[u].abundance;
                if abundance == 1 && self.params.detect_singletons {
                    poisson_upper_tail(1, expected)
                } else {
                    abundance_pvalue(abundance, expected)
                }
            })
            .collect()
    }

    fn expected(&self, partition: &Partition, assignment: &Assignment, u: usize) -> f64 {
        let reads = partition.clusters()[partition.cluster_of(u)].reads;
        assignment.lambda[u] * reads as f64
    }

    /// The sequence with the smallest p-value among those allowed to found a
    /// cluster. Ties go to the more abundant sequence, then the lower index.
    fn best_candidate(
        &self,
        partition: &Partition,
        assignment: &Assignment,
        pvalues: &[f64],
    ) -> Option<usize> {
        (0..self.uniques.len())
            .filter(|&u| !partition.is_center(u))
            .filter(|&u| {
                let fold = self.uniques[u].abundance as f64
                    / self.expected(partition, assignment, u);
                fold >= self.params.min_fold
                    && assignment.differences[u] as usize >= self.params.min_hamming
            })
            .min_by(|&a, &b| {
                pvalues[a]
                    .total_cmp(&pvalues[b])
                    .then(self.uniques[b].abundance.cmp(&self.uniques[a].abundance))
                    .then(a.cmp(&b))
            })
    }

    fn transitions(&self, partition: &Partition, assignment: &Assignment) -> TransitionCounts {
        let mq = self.model.max_quality();
        (0..self.uniques.len())
            .into_par_iter()
            .filter(|&u| assignment.lambda[u] > 0.0)
            .fold(
                || TransitionCounts::new(mq),
                |mut acc, u| {
                    let center = partition.clusters()[partition.cluster_of(u)].center;
                    count_transitions(
                        &self.uniques[center],
                        &self.uniques[u],
                        self.settings.band_size,
                        &mut acc,
                    );
                    acc
                },
            )
            .reduce(
                || TransitionCounts::new(mq),
                |mut a, b| {
                    a.merge(&b);
                    a
                },
            )
    }
}

/// Qualities present in the data but above the highest quality of the model.
fn quality_gaps(uniques: &[UniqueSequence], model: &ErrorModel) -> Vec<Diagnostic> {
    let max = model.max_quality();
    let above: BTreeSet<u8> = uniques
        .iter()
        .flat_map(|u| (0..u.len()).map(move |i| u.rounded_qual(i)))
        .filter(|&q| q > max)
        .collect();
    above
        .into_iter()
        .map(|quality| Diagnostic::QualityGap { quality, used: max })
        .collect()
}

/// Partition `uniques` into clusters under `model`.
pub fn denoise(
    uniques: &[UniqueSequence],
    model: &ErrorModel,
    params: &DenoiseParams,
    cancel: &CancelToken,
) -> DenoiseResult {
    let mut diagnostics = quality_gaps(uniques, model);
    for d in &diagnostics {
        warn!("{d}");
    }

    let n = uniques.len();
    let first = (0..n)
        .min_by(|&a, &b| uniques[b].abundance.cmp(&uniques[a].abundance).then(a.cmp(&b)))
        .unwrap_or(0);
    let mut partition = Partition::new(uniques.iter().map(|u| u.abundance).collect(), first);
    let mut denoiser = Denoiser {
        uniques,
        kmers: uniques.par_iter().map(|u| KmerProfile::new(&u.seq)).collect(),
        model,
        params,
        settings: CompareSettings::from(params),
        comparisons: Vec::new(),
    };
    if n > 0 {
        denoiser.comparisons.push(denoiser.compare_all(first));
    }

    let mut rounds = 0;
    let mut converged = false;
    let mut cancelled = false;
    let (assignment, pvalues) = loop {
        rounds += 1;
        let assignment = denoiser.reassign(&mut partition);
        let pvalues = denoiser.pvalues(&partition, &assignment);
        if n == 0 {
            converged = true;
            break (assignment, pvalues);
        }
        let Some(u) = denoiser
            .best_candidate(&partition, &assignment, &pvalues)
            .filter(|&u| pvalues[u] < params.omega_a)
        else {
            converged = true;
            break (assignment, pvalues);
        };
        if params.max_clusters > 0 && partition.num_clusters() >= params.max_clusters {
            warn!(
                "stopping at {} clusters, the configured maximum",
                partition.num_clusters()
            );
            break (assignment, pvalues);
        }
        if cancel.is_cancelled() {
            cancelled = true;
            break (assignment, pvalues);
        }
        let expected = denoiser.expected(&partition, &assignment, u);
        debug!(
            "new cluster {} from sequence {u} (abundance {}, p = {:e})",
            partition.num_clusters(),
            uniques[u].abundance,
            pvalues[u]
        );
        partition.add_cluster(u, pvalues[u], expected);
        let cmps = denoiser.compare_all(u);
        denoiser.comparisons.push(cmps);
    };

    if !converged {
        let d = Diagnostic::NotConverged {
            stage: "denoising".to_string(),
            iterations: rounds,
            cancelled,
        };
        warn!("{d}");
        diagnostics.push(d);
    }

    let transitions = denoiser.transitions(&partition, &assignment);
    let clusters = partition
        .clusters()
        .iter()
        .map(|c| {
            let center = &uniques[c.center];
            DenoisedCluster {
                sequence: center.seq.clone(),
                center: c.center,
                abundance: c.reads,
                n_uniques: c.n_uniques,
                birth_pvalue: c.birth_pvalue,
                birth_fold: if c.birth_expected > 0.0 {
                    center.abundance as f64 / c.birth_expected
                } else {
                    f64::INFINITY
                },
            }
        })
        .collect();

    DenoiseResult {
        clusters,
        assignment: partition.assignment().to_vec(),
        pvalues,
        transitions,
        rounds,
        converged,
        cancelled,
        diagnostics,
    }
}
