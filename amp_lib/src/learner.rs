//! Learn an error model by alternating denoising and re-estimation until the
//! rates stop changing.

use crate::cancel::CancelToken;
use crate::denoise::denoise;
use crate::derep::Dereplicated;
use crate::error::{AmpError, Diagnostic};
use crate::error_model::{ErrorModel, TransitionCounts};
use amp_fastq::WhichRead;
use amp_params::{DenoiseParams, LearnParams};
use log::{info, warn};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::Serialize;

/// A learned model and how it was reached.
#[derive(Debug, Clone, Serialize)]
pub struct LearnedErrors {
    pub which: WhichRead,
    pub model: ErrorModel,
    /// Counts the final model was estimated from.
    #[serde(skip)]
    pub transitions: TransitionCounts,
    pub iterations: usize,
    /// Largest rate change of each iteration.
    pub max_deltas: Vec<f64>,
    pub converged: bool,
    pub cancelled: bool,
    /// Indices of the input samples the model was learned from.
    pub samples_used: Vec<usize>,
    pub reads_used: u64,
    pub bases_used: u64,
    pub diagnostics: Vec<Diagnostic>,
}

/// Pick whole samples until at least `nbases` bases are collected, in input
/// order or shuffled by `seed`.
pub fn select_samples(samples: &[&Dereplicated], params: &LearnParams) -> Vec<usize> {
    let mut order: Vec<usize> = (0..samples.len()).collect();
    if params.randomize {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(params.seed);
        order.shuffle(&mut rng);
    }
    let mut bases = 0;
    let mut selected = Vec::new();
    for i in order {
        if bases >= params.nbases {
            break;
        }
        let sample_bases = samples[i].num_bases();
        if sample_bases == 0 {
            continue;
        }
        bases += sample_bases;
        selected.push(i);
    }
    selected
}

/// Learn the error model of one read direction.
///
/// Starts from [`ErrorModel::pessimistic`]; each iteration denoises every
/// selected sample under the current model, pools the transitions of all
/// samples and re-estimates. Stops when no rate changes by more than
/// `convergence`, after `max_consist` iterations, or on cancellation; the
/// latter two are reported as not converged.
pub fn learn_errors(
    which: WhichRead,
    samples: &[&Dereplicated],
    min_len: usize,
    learn: &LearnParams,
    denoise_params: &DenoiseParams,
    cancel: &CancelToken,
) -> Result<LearnedErrors, AmpError> {
    let min_len = min_len.max(1);
    let usable_idx: Vec<usize> = (0..samples.len())
        .filter(|&i| samples[i].uniques.iter().any(|u| u.len() >= min_len))
        .collect();
    let usable: Vec<&Dereplicated> = usable_idx.iter().map(|&i| samples[i]).collect();
    let selected = select_samples(&usable, learn);
    if selected.is_empty() {
        return Err(AmpError::NoLearningData { which, min_len });
    }
    let reads_used = selected
        .iter()
        .map(|&i| usable[i].num_reads() as u64)
        .sum();
    let bases_used = selected.iter().map(|&i| usable[i].num_bases()).sum();
    info!(
        "learning {which} error rates from {bases_used} bases in {reads_used} reads of {} samples",
        selected.len()
    );

    let mut model = ErrorModel::pessimistic(learn.max_quality);
    let mut transitions = TransitionCounts::new(learn.max_quality);
    let mut max_deltas = Vec::new();
    let mut diagnostics = Vec::new();
    let mut converged = false;
    let mut cancelled = false;

    for iteration in 1..=learn.max_consist {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        let results: Vec<_> = selected
            .par_iter()
            .map(|&i| denoise(&usable[i].uniques, &model, denoise_params, cancel))
            .collect();
        let clusters: usize = results.iter().map(|r| r.clusters.len()).sum();
        transitions = TransitionCounts::new(learn.max_quality);
        for r in &results {
            transitions.merge(&r.transitions);
        }
        let (new_model, gaps) = ErrorModel::estimate(&transitions);
        let delta = model.max_abs_diff(&new_model);
        info!("{which} error rates, iteration {iteration}: {clusters} clusters, max change {delta:e}");
        model = new_model;
        max_deltas.push(delta);
        diagnostics = gaps;
        if results.iter().any(|r| r.cancelled) {
            cancelled = true;
            break;
        }
        if delta < learn.convergence {
            converged = true;
            break;
        }
    }

    let iterations = max_deltas.len();
    if !converged {
        let d = Diagnostic::NotConverged {
            stage: format!("{which} error learning"),
            iterations,
            cancelled,
        };
        warn!("{d}");
        diagnostics.push(d);
    }

    Ok(LearnedErrors {
        which,
        model,
        transitions,
        iterations,
        max_deltas,
        converged,
        cancelled,
        samples_used: selected.iter().map(|&i| usable_idx[i]).collect(),
        reads_used,
        bases_used,
        diagnostics,
    })
}
