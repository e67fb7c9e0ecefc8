//! Ensemble aggregation
//!
//! Combines the full-length estimates of a bag of models into one result by
//! weighted elementwise averaging. Weights need not sum to 1; they are
//! normalized by their own sum here. A bag of one model with weight 1 is the
//! identity.

use ndarray::Array3;

/// Weighted average of per-model `(sources, channels, samples)` estimates.
///
/// All estimates must already be aligned to the same source order; the bag
/// validation and the engine guarantee that, along with a non-empty estimate
/// list and a positive weight sum.
pub(crate) fn combine(estimates: Vec<Array3<f32>>, weights: &[f32]) -> Array3<f32> {
    debug_assert_eq!(estimates.len(), weights.len());
    debug_assert!(!estimates.is_empty());

    let total: f32 = weights.iter().sum();
    debug_assert!(total > 0.0);

    let mut iter = estimates.into_iter().zip(weights);
    let Some((first, &w0)) = iter.next() else {
        return Array3::zeros((0, 0, 0));
    };
    let mut combined = first * (w0 / total);
    for (estimate, &w) in iter {
        combined.scaled_add(w / total, &estimate);
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn single_model_is_identity() {
        let estimate = Array3::from_shape_fn((2, 1, 8), |(s, _, i)| (s * 10 + i) as f32);
        let combined = combine(vec![estimate.clone()], &[1.0]);
        for (a, b) in combined.iter().zip(estimate.iter()) {
            assert!((a - b).abs() < 1e-7);
        }
    }

    #[test]
    fn weighted_average_of_constant_outputs() {
        // Models outputting constants V1 and V2 with weights 2 and 1 must
        // aggregate to (2*V1 + 1*V2) / 3 everywhere
        let v1 = Array3::from_elem((1, 2, 16), 0.9);
        let v2 = Array3::from_elem((1, 2, 16), -0.3);
        let combined = combine(vec![v1, v2], &[2.0, 1.0]);
        let expected = (2.0 * 0.9 + 1.0 * (-0.3)) / 3.0;
        for &v in combined.iter() {
            assert!((v - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn unnormalized_weights_are_scaled_by_their_sum() {
        let v1 = Array3::from_elem((1, 1, 4), 1.0);
        let v2 = Array3::from_elem((1, 1, 4), 3.0);
        // Same ratio as [0.25, 0.25] -> plain mean
        let combined = combine(vec![v1, v2], &[10.0, 10.0]);
        for &v in combined.iter() {
            assert!((v - 2.0).abs() < 1e-6);
        }
    }
}
