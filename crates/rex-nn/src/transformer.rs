//! Transformer token encoder
//!
//! A post-layer-norm encoder in the BERT arrangement: token and position
//! embeddings, embedding layer norm, then blocks of self-attention and a
//! GELU feed-forward network, each wrapped in a residual connection and
//! layer norm.

use crate::attention::MultiHeadAttention;
use crate::layers::{Embedding, LayerNorm, Linear, Mode};
use crate::ops::gelu;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rex_core::{EncoderConfig, RexError, Result};
use tracing::debug;

/// Produces one contextual vector per sub-word token
pub trait TokenEncoder: Send + Sync {
    /// Width of every output vector
    fn hidden_size(&self) -> usize;

    /// Encode one sequence. `attention_mask` marks real (non-padding) tokens.
    fn encode(&self, input_ids: &[usize], attention_mask: &[bool]) -> Result<Array2<f32>>;
}

#[derive(Debug, Clone)]
struct EncoderLayer {
    attention: MultiHeadAttention,
    attention_norm: LayerNorm,
    intermediate: Linear,
    output: Linear,
    output_norm: LayerNorm,
}

impl EncoderLayer {
    fn new(config: &EncoderConfig, rng: &mut dyn RngCore) -> Result<Self> {
        let hidden = config.hidden_size;
        Ok(Self {
            attention: MultiHeadAttention::self_attention(hidden, config.num_heads, 0.0, rng)?,
            attention_norm: LayerNorm::new(hidden, config.layer_norm_eps),
            intermediate: Linear::new(hidden, config.intermediate_size, true, rng),
            output: Linear::new(config.intermediate_size, hidden, true, rng),
            output_norm: LayerNorm::new(hidden, config.layer_norm_eps),
        })
    }

    fn forward(&self, x: &Array2<f32>, mask: &Array2<bool>, rng: &mut dyn RngCore) -> Result<Array2<f32>> {
        let attended = self.attention.forward(x, x, x, Some(mask), Mode::Eval, rng)?;
        let x = self.attention_norm.forward(&(attended + x))?;
        let ffn = self.output.forward(&gelu(self.intermediate.forward(&x)?))?;
        self.output_norm.forward(&(ffn + &x))
    }
}

/// Transformer encoder operating on already-tokenized ids
#[derive(Debug, Clone)]
pub struct TransformerEncoder {
    config: EncoderConfig,
    tokens: Embedding,
    positions: Embedding,
    embedding_norm: LayerNorm,
    layers: Vec<EncoderLayer>,
}

impl TransformerEncoder {
    /// Randomly initialised encoder, reproducible from `seed`
    pub fn new(config: EncoderConfig, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let tokens = Embedding::new(config.vocab_size, config.hidden_size, Some(0), &mut rng);
        let positions = Embedding::new(config.max_positions, config.hidden_size, None, &mut rng);
        let layers = (0..config.num_layers)
            .map(|_| EncoderLayer::new(&config, &mut rng))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            hidden = config.hidden_size,
            layers = config.num_layers,
            heads = config.num_heads,
            "Initialised transformer encoder"
        );
        Ok(Self {
            embedding_norm: LayerNorm::new(config.hidden_size, config.layer_norm_eps),
            tokens,
            positions,
            layers,
            config,
        })
    }

    /// Replace the token embedding table with pretrained vectors
    pub fn with_token_table(mut self, table: Array2<f32>) -> Result<Self> {
        if table.ncols() != self.config.hidden_size {
            return Err(RexError::shape(
                "token table width",
                self.config.hidden_size,
                table.ncols(),
            ));
        }
        self.tokens = Embedding::from_table(table, Some(0))?;
        Ok(self)
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }
}

impl TokenEncoder for TransformerEncoder {
    fn hidden_size(&self) -> usize {
        self.config.hidden_size
    }

    fn encode(&self, input_ids: &[usize], attention_mask: &[bool]) -> Result<Array2<f32>> {
        let len = input_ids.len();
        if attention_mask.len() != len {
            return Err(RexError::shape("attention mask", len, attention_mask.len()));
        }
        if len > self.positions.rows() {
            return Err(RexError::shape(
                "sequence length",
                format!("at most {}", self.positions.rows()),
                len,
            ));
        }

        let position_ids: Vec<usize> = (0..len).collect();
        let embedded = self.tokens.lookup(input_ids)? + self.positions.lookup(&position_ids)?;
        let mut x = self.embedding_norm.forward(&embedded)?;

        let key_mask = Array1::from_vec(attention_mask.to_vec());
        let mask = Array2::from_shape_fn((len, len), |(_, k)| key_mask[k]);
        // attention runs in eval mode, the rng is never drawn from
        let mut rng = StdRng::seed_from_u64(0);
        for layer in &self.layers {
            x = layer.forward(&x, &mask, &mut rng)?;
        }
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> EncoderConfig {
        EncoderConfig {
            vocab_size: 50,
            hidden_size: 8,
            num_layers: 2,
            num_heads: 2,
            intermediate_size: 16,
            max_positions: 32,
            layer_norm_eps: 1e-12,
        }
    }

    #[test]
    fn test_encode_shape() {
        let encoder = TransformerEncoder::new(small_config(), 11).unwrap();
        let out = encoder.encode(&[1, 5, 7, 2], &[true; 4]).unwrap();
        assert_eq!(out.dim(), (4, 8));
        assert_eq!(encoder.hidden_size(), 8);
    }

    #[test]
    fn test_same_seed_same_output() {
        let a = TransformerEncoder::new(small_config(), 3).unwrap();
        let b = TransformerEncoder::new(small_config(), 3).unwrap();
        let ids = [1, 9, 4];
        assert_eq!(
            a.encode(&ids, &[true; 3]).unwrap(),
            b.encode(&ids, &[true; 3]).unwrap()
        );
    }

    #[test]
    fn test_padding_does_not_change_real_tokens() {
        let encoder = TransformerEncoder::new(small_config(), 4).unwrap();
        let short = encoder.encode(&[1, 9, 4], &[true; 3]).unwrap();
        let padded = encoder
            .encode(&[1, 9, 4, 0, 0], &[true, true, true, false, false])
            .unwrap();
        for i in 0..3 {
            for j in 0..8 {
                assert!((short[[i, j]] - padded[[i, j]]).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_too_long_sequence_rejected() {
        let encoder = TransformerEncoder::new(small_config(), 4).unwrap();
        let ids = vec![1; 40];
        assert!(encoder.encode(&ids, &vec![true; 40]).is_err());
    }
}
