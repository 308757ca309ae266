//! Multi-head scaled dot-product attention

use crate::layers::{Dropout, Linear, Mode};
use crate::ops::masked_softmax;
use ndarray::{s, Array2, Axis};
use rand::RngCore;
use rex_core::{RexError, Result};

/// Multi-head attention with independent query, key and value widths.
///
/// All three inputs are projected to `d_model` and split into `heads`
/// slices of `d_model / heads`. A query row whose mask hides every key
/// yields an all-zero output row.
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    heads: usize,
    head_dim: usize,
    w_q: Linear,
    w_k: Linear,
    w_v: Linear,
    w_o: Linear,
    dropout: Dropout,
}

impl MultiHeadAttention {
    pub fn new(
        query_dim: usize,
        key_dim: usize,
        value_dim: usize,
        d_model: usize,
        heads: usize,
        dropout: f32,
        rng: &mut dyn RngCore,
    ) -> Result<Self> {
        if heads == 0 || d_model % heads != 0 {
            return Err(RexError::shape(
                "attention heads",
                format!("a divisor of {d_model}"),
                heads,
            ));
        }
        Ok(Self {
            heads,
            head_dim: d_model / heads,
            w_q: Linear::new(query_dim, d_model, true, rng),
            w_k: Linear::new(key_dim, d_model, true, rng),
            w_v: Linear::new(value_dim, d_model, true, rng),
            w_o: Linear::new(d_model, d_model, true, rng),
            dropout: Dropout::new(dropout),
        })
    }

    /// Self-attention over a sequence of equal-width vectors
    pub fn self_attention(
        width: usize,
        heads: usize,
        dropout: f32,
        rng: &mut dyn RngCore,
    ) -> Result<Self> {
        Self::new(width, width, width, width, heads, dropout, rng)
    }

    pub fn d_model(&self) -> usize {
        self.heads * self.head_dim
    }

    /// `query` is `(Q, query_dim)`, `key`/`value` are `(K, *)`, `mask` is
    /// `(Q, K)` with `true` where attention is allowed.
    pub fn forward(
        &self,
        query: &Array2<f32>,
        key: &Array2<f32>,
        value: &Array2<f32>,
        mask: Option<&Array2<bool>>,
        mode: Mode,
        rng: &mut dyn RngCore,
    ) -> Result<Array2<f32>> {
        let (q_len, k_len) = (query.nrows(), key.nrows());
        if value.nrows() != k_len {
            return Err(RexError::shape("attention values", k_len, value.nrows()));
        }
        let full_mask;
        let mask = match mask {
            Some(m) => {
                if m.dim() != (q_len, k_len) {
                    return Err(RexError::shape(
                        "attention mask",
                        format!("{q_len}x{k_len}"),
                        format!("{}x{}", m.nrows(), m.ncols()),
                    ));
                }
                m
            }
            None => {
                full_mask = Array2::from_elem((q_len, k_len), true);
                &full_mask
            }
        };

        let q = self.w_q.forward(query)?;
        let k = self.w_k.forward(key)?;
        let v = self.w_v.forward(value)?;
        let scale = (self.head_dim as f32).sqrt();

        let mut context = Array2::<f32>::zeros((q_len, self.d_model()));
        for h in 0..self.heads {
            let (lo, hi) = (h * self.head_dim, (h + 1) * self.head_dim);
            let scores = q.slice(s![.., lo..hi]).dot(&k.slice(s![.., lo..hi]).t()) / scale;

            let mut weights = Array2::<f32>::zeros((q_len, k_len));
            for (i, mut row) in weights.axis_iter_mut(Axis(0)).enumerate() {
                row.assign(&masked_softmax(scores.row(i), mask.row(i)));
            }
            let weights = self.dropout.apply(weights, mode, rng);
            context
                .slice_mut(s![.., lo..hi])
                .assign(&weights.dot(&v.slice(s![.., lo..hi])));
        }

        let mut out = self.w_o.forward(&context)?;
        for (i, mut row) in out.axis_iter_mut(Axis(0)).enumerate() {
            if !mask.row(i).iter().any(|&m| m) {
                row.fill(0.0);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_output_shape() {
        let mut rng = StdRng::seed_from_u64(0);
        let att = MultiHeadAttention::new(6, 4, 5, 8, 2, 0.0, &mut rng).unwrap();
        let out = att
            .forward(
                &Array2::ones((3, 6)),
                &Array2::ones((7, 4)),
                &Array2::ones((7, 5)),
                None,
                Mode::Eval,
                &mut rng,
            )
            .unwrap();
        assert_eq!(out.dim(), (3, 8));
    }

    #[test]
    fn test_heads_must_divide_width() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(MultiHeadAttention::new(4, 4, 4, 10, 3, 0.0, &mut rng).is_err());
    }

    #[test]
    fn test_fully_masked_row_is_zero() {
        let mut rng = StdRng::seed_from_u64(1);
        let att = MultiHeadAttention::self_attention(4, 2, 0.0, &mut rng).unwrap();
        let x = Array2::from_shape_fn((3, 4), |(i, j)| (i + j) as f32 * 0.1);
        let mut mask = Array2::from_elem((3, 3), true);
        mask.row_mut(1).fill(false);

        let out = att.forward(&x, &x, &x, Some(&mask), Mode::Eval, &mut rng).unwrap();
        assert!(out.row(1).iter().all(|&v| v == 0.0));
        assert!(out.row(0).iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_masked_keys_are_ignored() {
        let mut rng = StdRng::seed_from_u64(2);
        let att = MultiHeadAttention::self_attention(4, 1, 0.0, &mut rng).unwrap();
        let query = Array2::from_elem((1, 4), 0.5);
        let mut keys = Array2::from_elem((2, 4), 1.0);
        let mut mask = Array2::from_elem((1, 2), true);
        mask[[0, 1]] = false;

        let a = att.forward(&query, &keys, &keys, Some(&mask), Mode::Eval, &mut rng).unwrap();
        keys.row_mut(1).fill(-7.0);
        let b = att.forward(&query, &keys, &keys, Some(&mask), Mode::Eval, &mut rng).unwrap();
        assert_eq!(a, b);
    }
}
