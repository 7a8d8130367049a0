/// Fraction of the points used in each local fit when no span is given.
pub const DEFAULT_SPAN: f64 = 0.75;

fn tricube(u: f64) -> f64 {
    if u >= 1.0 {
        0.0
    } else {
        let t = 1.0 - u * u * u;
        t * t * t
    }
}

/// Locally weighted linear regression of `y` on `x`, evaluated at every `x`.
///
/// Each fit uses the `ceil(span * n)` nearest points, tricube distance weights
/// multiplied by the caller's `weights`. Points with zero weight do not pull
/// on the fit but still receive a fitted value. When a local fit is degenerate
/// (a single distinct `x`, or all local weight zero) the weighted mean of the
/// neighbourhood is used, and when even that is undefined the input value is
/// returned unchanged.
pub fn loess_fit(x: &[f64], y: &[f64], weights: &[f64], span: f64) -> Vec<f64> {
    let n = x.len();
    assert!(y.len() == n && weights.len() == n);
    assert!(span > 0.0);
    if n == 0 {
        return Vec::new();
    }
    let n_local = ((span * n as f64).ceil() as usize).clamp(1, n);

    (0..n)
        .map(|i| {
            let x0 = x[i];
            let mut dists: Vec<f64> = x.iter().map(|xj| (xj - x0).abs()).collect();
            dists.sort_by(f64::total_cmp);
            // widen the bandwidth slightly so the farthest neighbour keeps a small weight
            let h = dists[n_local - 1] * 1.0001;

            let mut sw = 0.0;
            let mut swx = 0.0;
            let mut swy = 0.0;
            let mut swxx = 0.0;
            let mut swxy = 0.0;
            for j in 0..n {
                let d = (x[j] - x0).abs();
                let kernel = if h > 0.0 {
                    tricube(d / h)
                } else if d == 0.0 {
                    1.0
                } else {
                    0.0
                };
                let w = kernel * weights[j];
                if w <= 0.0 {
                    continue;
                }
                sw += w;
                swx += w * x[j];
                swy += w * y[j];
                swxx += w * x[j] * x[j];
                swxy += w * x[j] * y[j];
            }
            if sw <= 0.0 {
                return y[i];
            }
            let mean_x = swx / sw;
            let mean_y = swy / sw;
            let var_x = swxx / sw - mean_x * mean_x;
            if var_x.abs() < 1e-12 {
                return mean_y;
            }
            let slope = (swxy / sw - mean_x * mean_y) / var_x;
            mean_y + slope * (x0 - mean_x)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loess_reproduces_a_line() {
        let x: Vec<f64> = (0..20).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 - 0.1 * v).collect();
        let w = vec![1.0; x.len()];
        let fit = loess_fit(&x, &y, &w, DEFAULT_SPAN);
        for (f, t) in fit.iter().zip(&y) {
            assert!((f - t).abs() < 1e-9, "{f} vs {t}");
        }
    }

    #[test]
    fn test_loess_ignores_zero_weight_outlier() {
        let x: Vec<f64> = (0..10).map(f64::from).collect();
        let mut y = vec![1.0; 10];
        y[5] = 100.0;
        let mut w = vec![1.0; 10];
        w[5] = 0.0;
        let fit = loess_fit(&x, &y, &w, DEFAULT_SPAN);
        assert!(fit.iter().all(|v| (v - 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_loess_all_zero_weight_passthrough() {
        let fit = loess_fit(&[0.0, 1.0], &[3.0, 4.0], &[0.0, 0.0], DEFAULT_SPAN);
        assert_eq!(fit, vec![3.0, 4.0]);
        assert!(loess_fit(&[], &[], &[], DEFAULT_SPAN).is_empty());
    }
}
