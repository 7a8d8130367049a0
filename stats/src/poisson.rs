use statrs::function::gamma::{gamma_lr, ln_gamma};

/// Relative size below which the tail series is considered converged.
const SERIES_EPS: f64 = 1e-17;

/// Natural log of the Poisson upper tail, `ln P(X >= k)` for `X ~ Poisson(lambda)`.
///
/// When `lambda < k` the tail is summed directly in log space,
/// `e^-λ λ^k / k! * (1 + λ/(k+1) + λ²/((k+1)(k+2)) + ...)`, which keeps full
/// relative precision for tails far below `f64::EPSILON`. Otherwise the
/// regularized lower incomplete gamma function is used.
pub fn ln_poisson_upper_tail(k: u64, lambda: f64) -> f64 {
    if k == 0 {
        return 0.0;
    }
    if lambda <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let a = k as f64;
    if lambda < a {
        let mut term = 1.0_f64;
        let mut sum = 1.0_f64;
        let mut n = a;
        loop {
            n += 1.0;
            term *= lambda / n;
            sum += term;
            if term <= sum * SERIES_EPS {
                break;
            }
        }
        -lambda + a * lambda.ln() - ln_gamma(a + 1.0) + sum.ln()
    } else {
        gamma_lr(a, lambda).ln()
    }
}

/// Upper tail of a Poisson distribution, `P(X >= k)` for `X ~ Poisson(lambda)`.
pub fn poisson_upper_tail(k: u64, lambda: f64) -> f64 {
    ln_poisson_upper_tail(k, lambda).exp()
}

/// Abundance p-value of a sequence observed `abundance` times when
/// `expected` reads are predicted to be errors of its cluster center.
///
/// The sequence was observed at least once, so the tail is conditioned on
/// `X >= 1`: `P(X >= a | X >= 1)`. An expectation of zero means no error
/// path to the center exists and the p-value is zero for any abundance
/// above one.
pub fn abundance_pvalue(abundance: u64, expected: f64) -> f64 {
    if abundance <= 1 {
        return 1.0;
    }
    if expected <= 0.0 {
        return 0.0;
    }
    let ln_observed = (-(-expected).exp_m1()).ln();
    let ln_p = ln_poisson_upper_tail(abundance, expected) - ln_observed;
    ln_p.exp().min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::{prop_assert, proptest};

    #[test]
    fn test_upper_tail_edges() {
        assert_eq!(poisson_upper_tail(0, 3.0), 1.0);
        assert_eq!(poisson_upper_tail(4, 0.0), 0.0);
        // P(X >= 1) = 1 - exp(-lambda)
        let p = poisson_upper_tail(1, 2.0);
        assert!((p - (1.0 - (-2.0f64).exp())).abs() < 1e-12);
        let p = poisson_upper_tail(1, 0.5);
        assert!((p - (1.0 - (-0.5f64).exp())).abs() < 1e-12);
    }

    #[test]
    fn test_upper_tail_far_tail_keeps_precision() {
        // P(X >= 10 | lambda = 1e-3) ~ lambda^10 / 10!
        let p = poisson_upper_tail(10, 1e-3);
        let approx = 1e-30 / 3_628_800.0;
        assert!(p > 0.0);
        assert!((p / approx - 1.0).abs() < 1e-2, "{p} vs {approx}");
    }

    #[test]
    fn test_abundance_pvalue() {
        assert_eq!(abundance_pvalue(1, 1e-9), 1.0);
        assert_eq!(abundance_pvalue(5, 0.0), 0.0);
        // An abundant sequence with a negligible error expectation is significant.
        assert!(abundance_pvalue(500, 1e-6) < 1e-40);
        // A handful of reads with ~1 expected error read is not.
        assert!(abundance_pvalue(3, 1.0) > 1e-3);
        // A doubleton at a tiny expectation is still far from 1e-40.
        let p = abundance_pvalue(2, 1e-18);
        assert!(p > 1e-20 && p < 1e-17, "{p}");
    }

    proptest! {
        #[test]
        fn prop_pvalue_monotone_in_abundance(
            a in 2u64..200,
            expected in 1e-6f64..50.0,
        ) {
            let p1 = abundance_pvalue(a, expected);
            let p2 = abundance_pvalue(a + 1, expected);
            prop_assert!((0.0..=1.0).contains(&p1));
            prop_assert!(p2 <= p1 * (1.0 + 1e-9) + 1e-300);
        }
    }
}
