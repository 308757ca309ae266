//! Recurrent encoders

use crate::layers::{xavier_uniform, Dropout, Mode};
use crate::ops::sigmoid;
use ndarray::{concatenate, s, Array1, Array2, Axis};
use rand::RngCore;
use rex_core::{RexError, Result};

/// Single-direction LSTM, gate order input | forget | cell | output
#[derive(Debug, Clone)]
pub struct Lstm {
    hidden: usize,
    w_ih: Array2<f32>,
    w_hh: Array2<f32>,
    bias: Array1<f32>,
}

impl Lstm {
    pub fn new(input: usize, hidden: usize, rng: &mut dyn RngCore) -> Self {
        let mut bias = Array1::zeros(4 * hidden);
        // forget gate starts open
        bias.slice_mut(s![hidden..2 * hidden]).fill(1.0);
        Self {
            hidden,
            w_ih: xavier_uniform(input, 4 * hidden, rng),
            w_hh: xavier_uniform(hidden, 4 * hidden, rng),
            bias,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.w_ih.nrows()
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden
    }

    /// Run over `(T, input)` and return `(T, hidden)`; `reverse` reads right to left
    pub fn forward(&self, seq: &Array2<f32>, reverse: bool) -> Result<Array2<f32>> {
        if seq.ncols() != self.input_dim() {
            return Err(RexError::shape("lstm input", self.input_dim(), seq.ncols()));
        }
        let n = self.hidden;
        let steps = seq.nrows();
        let projected = seq.dot(&self.w_ih) + &self.bias;

        let mut out = Array2::zeros((steps, n));
        let mut h = Array1::<f32>::zeros(n);
        let mut c = Array1::<f32>::zeros(n);
        let order: Box<dyn Iterator<Item = usize>> = if reverse {
            Box::new((0..steps).rev())
        } else {
            Box::new(0..steps)
        };
        for t in order {
            let gates = &projected.row(t) + &h.dot(&self.w_hh);
            let i = gates.slice(s![..n]).mapv(sigmoid);
            let f = gates.slice(s![n..2 * n]).mapv(sigmoid);
            let g = gates.slice(s![2 * n..3 * n]).mapv(f32::tanh);
            let o = gates.slice(s![3 * n..]).mapv(sigmoid);
            c = &f * &c + &i * &g;
            h = &o * &c.mapv(f32::tanh);
            out.row_mut(t).assign(&h);
        }
        Ok(out)
    }
}

/// Stacked bidirectional LSTM; each layer concatenates forward and backward states
#[derive(Debug, Clone)]
pub struct BiLstm {
    layers: Vec<(Lstm, Lstm)>,
    dropout: Dropout,
}

impl BiLstm {
    pub fn new(
        input: usize,
        hidden: usize,
        num_layers: usize,
        dropout: f32,
        rng: &mut dyn RngCore,
    ) -> Self {
        let layers = (0..num_layers.max(1))
            .map(|layer| {
                let width = if layer == 0 { input } else { 2 * hidden };
                (Lstm::new(width, hidden, rng), Lstm::new(width, hidden, rng))
            })
            .collect();
        Self {
            layers,
            dropout: Dropout::new(dropout),
        }
    }

    pub fn output_dim(&self) -> usize {
        2 * self.layers.first().map(|(f, _)| f.hidden_dim()).unwrap_or(0)
    }

    pub fn forward(
        &self,
        seq: &Array2<f32>,
        mode: Mode,
        rng: &mut dyn RngCore,
    ) -> Result<Array2<f32>> {
        let mut x = seq.clone();
        for (idx, (fwd, bwd)) in self.layers.iter().enumerate() {
            if idx > 0 {
                x = self.dropout.apply(x, mode, rng);
            }
            let forward = fwd.forward(&x, false)?;
            let backward = bwd.forward(&x, true)?;
            x = concatenate(Axis(1), &[forward.view(), backward.view()])
                .map_err(|e| RexError::shape("bilstm concat", "matching rows", e))?;
        }
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_lstm_shapes() {
        let mut rng = StdRng::seed_from_u64(5);
        let lstm = Lstm::new(3, 4, &mut rng);
        let out = lstm.forward(&Array2::ones((6, 3)), false).unwrap();
        assert_eq!(out.dim(), (6, 4));
        assert!(out.iter().all(|v| v.abs() < 1.0));
    }

    #[test]
    fn test_reverse_reads_right_to_left() {
        let mut rng = StdRng::seed_from_u64(5);
        let lstm = Lstm::new(2, 3, &mut rng);
        let seq = Array2::from_shape_fn((4, 2), |(t, j)| (t * 2 + j) as f32 * 0.3);
        let mut flipped = seq.clone();
        flipped.invert_axis(Axis(0));

        let backward = lstm.forward(&seq, true).unwrap();
        let mut forward = lstm.forward(&flipped, false).unwrap();
        forward.invert_axis(Axis(0));
        for (a, b) in backward.iter().zip(forward.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_bilstm_layers() {
        let mut rng = StdRng::seed_from_u64(9);
        let bilstm = BiLstm::new(5, 4, 2, 0.5, &mut rng);
        assert_eq!(bilstm.output_dim(), 8);
        let out = bilstm
            .forward(&Array2::ones((3, 5)), Mode::Eval, &mut rng)
            .unwrap();
        assert_eq!(out.dim(), (3, 8));
    }
}
