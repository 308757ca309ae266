//! Pair-representation stages run after feature concatenation
//!
//! Flags resolve once into an ordered `Vec<Box<dyn PairStage>>`; the
//! forward pass just folds over it.

use ndarray::{concatenate, Array2, Axis};
use rand::RngCore;
use rex_core::{Result, RexError};
use rex_nn::ops::relu;
use rex_nn::{Dropout, Linear, Mode, MultiHeadAttention};

/// One step of the pair pipeline
pub trait PairStage: Send + Sync {
    /// Stage name for logging
    fn name(&self) -> &'static str;

    /// Width of the rows this stage emits
    fn output_dim(&self) -> usize;

    /// `x` holds one row per selected pair; `documents[p]` is the batch index of pair `p`
    fn forward(
        &self,
        x: Array2<f32>,
        documents: &[usize],
        mode: Mode,
        rng: &mut dyn RngCore,
    ) -> Result<Array2<f32>>;
}

// ============================================================================
// Context attention
// ============================================================================

/// Self-attention among the pairs of the same document; emits `[x, ctx]`
pub struct ContextAttention {
    attention: MultiHeadAttention,
    input_dim: usize,
}

impl ContextAttention {
    pub fn new(input_dim: usize, dropout: f32, rng: &mut dyn RngCore) -> Result<Self> {
        Ok(Self {
            attention: MultiHeadAttention::self_attention(input_dim, 1, dropout, rng)?,
            input_dim,
        })
    }
}

impl PairStage for ContextAttention {
    fn name(&self) -> &'static str {
        "context_attention"
    }

    fn output_dim(&self) -> usize {
        2 * self.input_dim
    }

    fn forward(
        &self,
        x: Array2<f32>,
        documents: &[usize],
        mode: Mode,
        rng: &mut dyn RngCore,
    ) -> Result<Array2<f32>> {
        if documents.len() != x.nrows() {
            return Err(RexError::shape("pair documents", x.nrows(), documents.len()));
        }
        let same_doc = Array2::from_shape_fn((x.nrows(), x.nrows()), |(i, j)| {
            documents[i] == documents[j]
        });
        let ctx = self
            .attention
            .forward(&x, &x, &x, Some(&same_doc), mode, rng)?;
        concatenate(Axis(1), &[x.view(), ctx.view()])
            .map_err(|e| RexError::shape("context attention", "matching rows", e))
    }
}

// ============================================================================
// MLP
// ============================================================================

/// `Linear + ReLU` repeated
pub struct Mlp {
    layers: Vec<Linear>,
}

impl Mlp {
    pub fn new(input_dim: usize, hidden: usize, depth: usize, rng: &mut dyn RngCore) -> Self {
        let layers = (0..depth)
            .map(|i| Linear::new(if i == 0 { input_dim } else { hidden }, hidden, true, rng))
            .collect();
        Self { layers }
    }
}

impl PairStage for Mlp {
    fn name(&self) -> &'static str {
        "mlp"
    }

    fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, Linear::out_dim)
    }

    fn forward(&self, x: Array2<f32>, _: &[usize], _: Mode, _: &mut dyn RngCore) -> Result<Array2<f32>> {
        self.layers
            .iter()
            .try_fold(x, |h, layer| Ok(relu(layer.forward(&h)?)))
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// Dropout then a linear map to one logit per relation
pub struct Classifier {
    dropout: Dropout,
    linear: Linear,
}

impl Classifier {
    pub fn new(input_dim: usize, rel_size: usize, dropout: f32, rng: &mut dyn RngCore) -> Self {
        Self {
            dropout: Dropout::new(dropout),
            linear: Linear::new(input_dim, rel_size, true, rng),
        }
    }
}

impl PairStage for Classifier {
    fn name(&self) -> &'static str {
        "classifier"
    }

    fn output_dim(&self) -> usize {
        self.linear.out_dim()
    }

    fn forward(
        &self,
        x: Array2<f32>,
        _: &[usize],
        mode: Mode,
        rng: &mut dyn RngCore,
    ) -> Result<Array2<f32>> {
        self.linear.forward(&self.dropout.apply(x, mode, rng))
    }
}
