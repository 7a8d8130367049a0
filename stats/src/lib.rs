//! stats
#![deny(missing_docs)]

mod isotonic;
mod loess;
mod poisson;
pub use isotonic::isotonic_non_increasing;
pub use loess::{loess_fit, DEFAULT_SPAN};
pub use poisson::{abundance_pvalue, ln_poisson_upper_tail, poisson_upper_tail};

/// Weighted arithmetic mean. Returns `None` when the total weight is zero.
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> Option<f64> {
    assert_eq!(values.len(), weights.len());
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return None;
    }
    Some(values.iter().zip(weights).map(|(v, w)| v * w).sum::<f64>() / total)
}
