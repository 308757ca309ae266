//! Sub-word encoder output to per-word vectors

use super::batch::GlreDocument;
use ndarray::{s, Array2};
use rand::RngCore;
use rex_core::{GlreConfig, Result, RexError};
use rex_nn::{BiLstm, Linear, Mode, TokenEncoder};
use std::sync::Arc;

/// Token encoder, optional BiLSTM and a projection to `lstm_dim`
pub struct WordEncoder {
    encoder: Arc<dyn TokenEncoder>,
    bilstm: Option<BiLstm>,
    projection: Linear,
}

impl WordEncoder {
    pub fn new(encoder: Arc<dyn TokenEncoder>, config: &GlreConfig, rng: &mut dyn RngCore) -> Self {
        let hidden = encoder.hidden_size();
        let bilstm = config
            .bilstm
            .then(|| BiLstm::new(hidden, config.lstm_dim, config.bilstm_layers, config.drop_i, rng));
        let width = bilstm.as_ref().map_or(hidden, BiLstm::output_dim);
        Self {
            projection: Linear::new(width, config.lstm_dim, true, rng),
            bilstm,
            encoder,
        }
    }

    /// Width of the returned word vectors
    pub fn output_dim(&self) -> usize {
        self.projection.out_dim()
    }

    /// `(W, lstm_dim)` word vectors of one document
    pub fn forward(&self, doc: &GlreDocument, mode: Mode, rng: &mut dyn RngCore) -> Result<Array2<f32>> {
        let tokens = self.encoder.encode(&doc.token_ids, &doc.attention_mask())?;
        let words = gather_word_starts(&tokens, &doc.token_starts, doc.word_count())?;
        let words = match &self.bilstm {
            Some(lstm) => lstm.forward(&words, mode, rng)?,
            None => words,
        };
        self.projection.forward(&words)
    }
}

/// Rows of `tokens` at every word start, zero-padded to `word_count` rows.
///
/// More word starts than words is a shape error.
pub fn gather_word_starts(tokens: &Array2<f32>, starts: &[bool], word_count: usize) -> Result<Array2<f32>> {
    if starts.len() != tokens.nrows() {
        return Err(RexError::shape("token starts", tokens.nrows(), starts.len()));
    }
    let index: Vec<usize> = starts
        .iter()
        .enumerate()
        .filter_map(|(i, &start)| start.then_some(i))
        .collect();
    if index.len() > word_count {
        return Err(RexError::shape(
            "word starts",
            format!("at most {word_count}"),
            index.len(),
        ));
    }
    let mut words = Array2::zeros((word_count, tokens.ncols()));
    for (w, &t) in index.iter().enumerate() {
        words.row_mut(w).assign(&tokens.row(t));
    }
    Ok(words)
}

/// Sentence node of every mention, used as attention keys by the local
/// representation layer
pub fn mention_contexts(sentences: &Array2<f32>, sentence_ids: &[usize]) -> Result<Array2<f32>> {
    let mut out = Array2::zeros((sentence_ids.len(), sentences.ncols()));
    for (m, &s) in sentence_ids.iter().enumerate() {
        if s >= sentences.nrows() {
            return Err(RexError::shape(
                "mention sentence",
                format!("below {}", sentences.nrows()),
                s,
            ));
        }
        out.slice_mut(s![m, ..]).assign(&sentences.row(s));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glre::batch::tests::sample_document;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rex_core::EncoderConfig;
    use rex_nn::TransformerEncoder;

    #[test]
    fn test_gather_pads_missing_words() {
        let tokens = array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]];
        let words = gather_word_starts(&tokens, &[true, false, true], 3).unwrap();
        assert_eq!(words, array![[1.0, 1.0], [3.0, 3.0], [0.0, 0.0]]);
    }

    #[test]
    fn test_gather_rejects_extra_starts() {
        let tokens = array![[1.0], [2.0], [3.0]];
        assert!(gather_word_starts(&tokens, &[true, true, true], 2).is_err());
        assert!(gather_word_starts(&tokens, &[true], 2).is_err());
    }

    #[test]
    fn test_mention_contexts_follow_sentence() {
        let sentences = array![[1.0, 0.0], [0.0, 1.0]];
        let ctx = mention_contexts(&sentences, &[1, 0, 1]).unwrap();
        assert_eq!(ctx, array![[0.0, 1.0], [1.0, 0.0], [0.0, 1.0]]);
        assert!(mention_contexts(&sentences, &[2]).is_err());
    }

    #[test]
    fn test_word_encoder_shapes() {
        let encoder = TransformerEncoder::new(
            EncoderConfig {
                vocab_size: 20,
                hidden_size: 8,
                num_layers: 1,
                num_heads: 2,
                intermediate_size: 16,
                max_positions: 16,
                ..EncoderConfig::default()
            },
            1,
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        for bilstm in [false, true] {
            let config = GlreConfig {
                lstm_dim: 6,
                bilstm,
                ..GlreConfig::default()
            };
            let words = WordEncoder::new(Arc::new(encoder.clone()), &config, &mut rng);
            let out = words.forward(&sample_document(), Mode::Eval, &mut rng).unwrap();
            assert_eq!(out.dim(), (6, 6));
            assert_eq!(words.output_dim(), 6);
        }
    }
}
