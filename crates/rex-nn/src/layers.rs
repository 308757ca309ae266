//! Dense building blocks: linear maps, lookup tables, dropout, layer norm

use ndarray::{Array, Array1, Array2, ArrayBase, ArrayView1, Axis, Data, Dimension, Ix2};
use rand::{Rng, RngCore};
use rex_core::{RexError, Result};

/// Whether stochastic layers are active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Train,
    #[default]
    Eval,
}

impl Mode {
    pub fn is_train(self) -> bool {
        self == Mode::Train
    }
}

/// Xavier-uniform matrix of shape `(fan_in, fan_out)`
pub fn xavier_uniform(fan_in: usize, fan_out: usize, rng: &mut dyn RngCore) -> Array2<f32> {
    let bound = if fan_in + fan_out == 0 {
        0.0
    } else {
        (6.0 / (fan_in + fan_out) as f32).sqrt()
    };
    Array2::from_shape_fn((fan_in, fan_out), |_| rng.gen_range(-bound..=bound))
}

/// Affine map `x W + b` with `W` stored as `(in, out)`
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Array2<f32>,
    bias: Option<Array1<f32>>,
}

impl Linear {
    pub fn new(in_dim: usize, out_dim: usize, bias: bool, rng: &mut dyn RngCore) -> Self {
        Self {
            weight: xavier_uniform(in_dim, out_dim, rng),
            bias: bias.then(|| Array1::zeros(out_dim)),
        }
    }

    /// Wrap externally trained weights
    pub fn from_weights(weight: Array2<f32>, bias: Option<Array1<f32>>) -> Result<Self> {
        if let Some(b) = &bias {
            if b.len() != weight.ncols() {
                return Err(RexError::shape("linear bias", weight.ncols(), b.len()));
            }
        }
        Ok(Self { weight, bias })
    }

    pub fn in_dim(&self) -> usize {
        self.weight.nrows()
    }

    pub fn out_dim(&self) -> usize {
        self.weight.ncols()
    }

    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Array1<f32>> {
        self.bias.as_ref()
    }

    pub fn forward<S: Data<Elem = f32>>(&self, x: &ArrayBase<S, Ix2>) -> Result<Array2<f32>> {
        if x.ncols() != self.in_dim() {
            return Err(RexError::shape("linear input", self.in_dim(), x.ncols()));
        }
        let mut out = x.dot(&self.weight);
        if let Some(b) = &self.bias {
            out += b;
        }
        Ok(out)
    }

    /// Single-vector convenience wrapper
    pub fn forward_vec(&self, x: ArrayView1<'_, f32>) -> Result<Array1<f32>> {
        let row = x.insert_axis(Axis(0));
        Ok(self.forward(&row)?.index_axis_move(Axis(0), 0))
    }
}

/// Lookup table with an optional all-zero padding row
#[derive(Debug, Clone)]
pub struct Embedding {
    table: Array2<f32>,
    padding_idx: Option<usize>,
}

impl Embedding {
    pub fn new(
        rows: usize,
        dim: usize,
        padding_idx: Option<usize>,
        rng: &mut dyn RngCore,
    ) -> Self {
        let mut table = Array2::from_shape_fn((rows, dim), |_| rng.gen_range(-0.1f32..=0.1));
        if let Some(p) = padding_idx.filter(|&p| p < rows) {
            table.row_mut(p).fill(0.0);
        }
        Self { table, padding_idx }
    }

    pub fn from_table(mut table: Array2<f32>, padding_idx: Option<usize>) -> Result<Self> {
        if let Some(p) = padding_idx {
            if p >= table.nrows() {
                return Err(RexError::shape("embedding padding index", table.nrows(), p));
            }
            table.row_mut(p).fill(0.0);
        }
        Ok(Self { table, padding_idx })
    }

    pub fn rows(&self) -> usize {
        self.table.nrows()
    }

    pub fn dim(&self) -> usize {
        self.table.ncols()
    }

    pub fn padding_idx(&self) -> Option<usize> {
        self.padding_idx
    }

    pub fn row(&self, idx: usize) -> Result<ArrayView1<'_, f32>> {
        if idx >= self.rows() {
            return Err(RexError::shape("embedding index", self.rows(), idx));
        }
        Ok(self.table.row(idx))
    }

    pub fn lookup(&self, ids: &[usize]) -> Result<Array2<f32>> {
        if let Some(&bad) = ids.iter().find(|&&i| i >= self.rows()) {
            return Err(RexError::shape("embedding index", self.rows(), bad));
        }
        Ok(self.table.select(Axis(0), ids))
    }
}

/// Inverted dropout
#[derive(Debug, Clone, Copy)]
pub struct Dropout {
    p: f32,
}

impl Dropout {
    pub fn new(p: f32) -> Self {
        Self {
            p: p.clamp(0.0, 0.99),
        }
    }

    pub fn p(&self) -> f32 {
        self.p
    }

    pub fn apply<D: Dimension>(
        &self,
        mut x: Array<f32, D>,
        mode: Mode,
        rng: &mut dyn RngCore,
    ) -> Array<f32, D> {
        if !mode.is_train() || self.p == 0.0 {
            return x;
        }
        let keep = 1.0 - self.p;
        x.map_inplace(|v| {
            *v = if rng.gen::<f32>() < self.p {
                0.0
            } else {
                *v / keep
            }
        });
        x
    }
}

/// Row-wise layer normalisation
#[derive(Debug, Clone)]
pub struct LayerNorm {
    gamma: Array1<f32>,
    beta: Array1<f32>,
    eps: f32,
}

impl LayerNorm {
    pub fn new(dim: usize, eps: f32) -> Self {
        Self {
            gamma: Array1::ones(dim),
            beta: Array1::zeros(dim),
            eps,
        }
    }

    pub fn forward(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.gamma.len() {
            return Err(RexError::shape("layer norm", self.gamma.len(), x.ncols()));
        }
        let mut out = x.clone();
        for mut row in out.axis_iter_mut(Axis(0)) {
            let mean = row.mean().unwrap_or(0.0);
            let var = row.mapv(|v| (v - mean).powi(2)).mean().unwrap_or(0.0);
            let denom = (var + self.eps).sqrt();
            row.mapv_inplace(|v| (v - mean) / denom);
        }
        out *= &self.gamma;
        out += &self.beta;
        Ok(out)
    }
}
