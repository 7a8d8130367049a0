/// Weighted isotonic regression constrained to be non-increasing.
///
/// Pool-adjacent-violators: adjacent blocks whose means increase are merged
/// into their weighted mean until the sequence is monotone. Weights must be
/// strictly positive.
pub fn isotonic_non_increasing(values: &[f64], weights: &[f64]) -> Vec<f64> {
    assert_eq!(values.len(), weights.len());
    // (weighted mean, total weight, number of points)
    let mut blocks: Vec<(f64, f64, usize)> = Vec::with_capacity(values.len());
    for (&v, &w) in values.iter().zip(weights) {
        assert!(w > 0.0, "isotonic regression weights must be positive, got {w}");
        blocks.push((v, w, 1));
        while blocks.len() > 1 {
            let (m2, w2, n2) = blocks[blocks.len() - 1];
            let (m1, w1, n1) = blocks[blocks.len() - 2];
            if m2 <= m1 {
                break;
            }
            blocks.truncate(blocks.len() - 2);
            let w = w1 + w2;
            blocks.push(((m1 * w1 + m2 * w2) / w, w, n1 + n2));
        }
    }
    blocks
        .into_iter()
        .flat_map(|(m, _, n)| std::iter::repeat(m).take(n))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::collection::vec;
    use proptest::{prop_assert, prop_assert_eq, proptest};

    #[test]
    fn test_already_monotone() {
        let v = vec![5.0, 4.0, 4.0, 1.0];
        assert_eq!(isotonic_non_increasing(&v, &[1.0; 4]), v);
    }

    #[test]
    fn test_pools_violators() {
        let fit = isotonic_non_increasing(&[3.0, 1.0, 2.0, 0.0], &[1.0; 4]);
        assert_eq!(fit, vec![3.0, 1.5, 1.5, 0.0]);
    }

    #[test]
    fn test_weighted_pool() {
        let fit = isotonic_non_increasing(&[1.0, 4.0], &[3.0, 1.0]);
        assert_eq!(fit, vec![1.75, 1.75]);
    }

    proptest! {
        #[test]
        fn prop_output_is_non_increasing(
            values in vec(-10.0f64..10.0, 0..40),
        ) {
            let weights = vec![1.0; values.len()];
            let fit = isotonic_non_increasing(&values, &weights);
            prop_assert_eq!(fit.len(), values.len());
            for w in fit.windows(2) {
                prop_assert!(w[1] <= w[0] + 1e-12);
            }
        }
    }
}
