//! Element-wise activations and normalisation helpers

use ndarray::{Array, Array1, ArrayView1, Axis, Dimension};

pub fn relu<D: Dimension>(mut x: Array<f32, D>) -> Array<f32, D> {
    x.mapv_inplace(|v| v.max(0.0));
    x
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// GELU, tanh approximation
pub fn gelu<D: Dimension>(mut x: Array<f32, D>) -> Array<f32, D> {
    const C: f32 = 0.797_884_6; // sqrt(2 / pi)
    x.mapv_inplace(|v| 0.5 * v * (1.0 + (C * (v + 0.044_715 * v * v * v)).tanh()));
    x
}

/// Softmax over the positions where `mask` is true.
///
/// Masked positions get probability zero. If nothing is visible the result
/// is all zeros.
pub fn masked_softmax(scores: ArrayView1<'_, f32>, mask: ArrayView1<'_, bool>) -> Array1<f32> {
    let max = scores
        .iter()
        .zip(mask.iter())
        .filter(|&(_, &m)| m)
        .map(|(&s, _)| s)
        .fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        return Array1::zeros(scores.len());
    }

    let mut out = Array1::zeros(scores.len());
    let mut total = 0.0;
    for ((o, &s), &m) in out.iter_mut().zip(scores.iter()).zip(mask.iter()) {
        if m {
            *o = (s - max).exp();
            total += *o;
        }
    }
    out /= total;
    out
}

pub fn softmax(scores: ArrayView1<'_, f32>) -> Array1<f32> {
    let max = scores.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let mut out = scores.mapv(|s| (s - max).exp());
    let total = out.sum();
    out /= total;
    out
}

/// Binary cross-entropy on logits, numerically stable form
pub fn bce_with_logits(logit: f32, target: f32) -> f32 {
    logit.max(0.0) - logit * target + (-logit.abs()).exp().ln_1p()
}

/// Index of the largest value along the last axis of every row
pub fn argmax_rows(x: &ndarray::Array2<f32>) -> Vec<usize> {
    x.axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &v)| {
                    if v > best.1 {
                        (i, v)
                    } else {
                        best
                    }
                })
                .0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};
    use proptest::prelude::*;

    #[test]
    fn test_relu() {
        assert_eq!(relu(array![-1.0, 0.0, 2.5]), array![0.0, 0.0, 2.5]);
    }

    #[test]
    fn test_masked_softmax() {
        let p = masked_softmax(array![1.0, 5.0, 1.0].view(), array![true, false, true].view());
        assert!((p[0] - 0.5).abs() < 1e-6);
        assert_eq!(p[1], 0.0);
        assert!((p.sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_fully_masked_softmax_is_zero() {
        let p = masked_softmax(array![1.0, 2.0].view(), array![false, false].view());
        assert_eq!(p, array![0.0, 0.0]);
    }

    #[test]
    fn test_bce_with_logits() {
        let expected = -(sigmoid(0.3).ln());
        assert!((bce_with_logits(0.3, 1.0) - expected).abs() < 1e-5);
        let expected = -((1.0 - sigmoid(-2.0)).ln());
        assert!((bce_with_logits(-2.0, 0.0) - expected).abs() < 1e-5);
    }

    #[test]
    fn test_argmax_rows() {
        let x = Array2::from_shape_vec((2, 3), vec![0.1, 0.7, 0.2, 3.0, -1.0, 2.0]).unwrap();
        assert_eq!(argmax_rows(&x), vec![1, 0]);
    }

    #[test]
    fn test_gelu_fixed_points() {
        let y = gelu(array![0.0, 10.0]);
        assert_eq!(y[0], 0.0);
        assert!((y[1] - 10.0).abs() < 1e-3);
    }

    proptest! {
        #[test]
        fn prop_masked_softmax_is_distribution(
            (scores, mask) in (1usize..16).prop_flat_map(|n| (
                proptest::collection::vec(-20.0f32..20.0, n),
                proptest::collection::vec(any::<bool>(), n),
            ))
        ) {
            let p = masked_softmax(
                Array1::from_vec(scores).view(),
                Array1::from_vec(mask.clone()).view(),
            );
            for (&v, &m) in p.iter().zip(mask.iter()) {
                prop_assert!(v >= 0.0);
                if !m {
                    prop_assert_eq!(v, 0.0);
                }
            }
            if mask.iter().any(|&m| m) {
                prop_assert!((p.sum() - 1.0).abs() < 1e-4);
            } else {
                prop_assert_eq!(p.sum(), 0.0);
            }
        }
    }
}
