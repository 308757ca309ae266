//! Token-pair scorer producing `(L, L, R, 4)` tag logits

use super::tags::{LossMask, TagCube, TAG_SIZE};
use ndarray::{s, Array2, Array4, Axis};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rex_core::{OneRelConfig, Result, RexError};
use rex_nn::ops::{relu, softmax};
use rex_nn::{Dropout, Linear, Mode, TokenEncoder};
use std::sync::Arc;
use tracing::debug;

/// Focusing parameter of the focal term in [`table_loss`]
pub const FOCAL_GAMMA: f32 = 2.0;

/// OneRel scorer
///
/// Every token pair `[h_i; h_j]` goes through `Linear(2d -> 3d)`, dropout,
/// ReLU and `Linear(3d -> R * 4)`.
pub struct OneRelModel {
    encoder: Arc<dyn TokenEncoder>,
    projection: Linear,
    relation_matrix: Linear,
    dropout: Dropout,
    pair_dropout: Dropout,
    relation_number: usize,
}

impl OneRelModel {
    pub fn new(encoder: Arc<dyn TokenEncoder>, config: &OneRelConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let dim = encoder.hidden_size();
        debug!(dim, relations = config.relation_number, "Initialised OneRel scorer");
        Self {
            projection: Linear::new(2 * dim, 3 * dim, true, &mut rng),
            relation_matrix: Linear::new(3 * dim, config.relation_number * TAG_SIZE, true, &mut rng),
            dropout: Dropout::new(config.dropout_prob),
            pair_dropout: Dropout::new(config.entity_pair_dropout),
            relation_number: config.relation_number,
            encoder,
        }
    }

    pub fn relation_number(&self) -> usize {
        self.relation_number
    }

    /// Tag logits indexed `[head, tail, relation, tag]`
    pub fn forward(
        &self,
        token_ids: &[usize],
        attention_mask: &[bool],
        mode: Mode,
        rng: &mut dyn RngCore,
    ) -> Result<Array4<f32>> {
        let encoded = self.encoder.encode(token_ids, attention_mask)?;
        let encoded = self.dropout.apply(encoded, mode, rng);
        let (len, dim) = encoded.dim();

        // Linear over [h_i; h_j] split into its head and tail halves
        let weight = self.projection.weight();
        let mut head = encoded.dot(&weight.slice(s![..dim, ..]));
        if let Some(bias) = self.projection.bias() {
            head += bias;
        }
        let tail = encoded.dot(&weight.slice(s![dim.., ..]));

        let mut out = Array4::zeros((len, len, self.relation_number, TAG_SIZE));
        for i in 0..len {
            let pairs: Array2<f32> = &tail + &head.row(i);
            let pairs = relu(self.pair_dropout.apply(pairs, mode, rng));
            let scores = self
                .relation_matrix
                .forward(&pairs)?
                .into_shape_with_order((len, self.relation_number, TAG_SIZE))
                .map_err(|e| RexError::shape("tag logits", "(L, R, 4)", e))?;
            out.index_axis_mut(Axis(0), i).assign(&scores);
        }
        Ok(out)
    }

    /// Argmax tag cube in evaluation mode
    pub fn predict(&self, token_ids: &[usize], attention_mask: &[bool]) -> Result<TagCube> {
        let mut rng = StdRng::seed_from_u64(0);
        let scores = self.forward(token_ids, attention_mask, Mode::Eval, &mut rng)?;
        TagCube::from_scores(&scores)
    }
}

/// Masked cross-entropy over every `(head, tail, relation)` cell, plus a
/// focal term when `focal` is set.
///
/// Both terms are summed over cells and divided by the number of unmasked
/// `(head, tail)` positions.
pub fn table_loss(scores: &Array4<f32>, target: &TagCube, mask: &LossMask, focal: bool) -> Result<f32> {
    let (rows, cols, relations, tags) = scores.dim();
    if rows != target.len() || cols != target.len() || relations != target.relations() || tags != TAG_SIZE {
        return Err(RexError::shape(
            "tag logits",
            format!("({0}, {0}, {1}, {TAG_SIZE})", target.len(), target.relations()),
            format!("({rows}, {cols}, {relations}, {tags})"),
        ));
    }
    if mask.len() != rows {
        return Err(RexError::shape("loss mask", rows, mask.len()));
    }
    let denom = mask.count();
    if denom == 0 {
        return Ok(0.0);
    }

    let mut total = 0.0;
    for i in 0..rows {
        for j in 0..cols {
            if !mask.get(i, j) {
                continue;
            }
            for r in 0..relations {
                let probs = softmax(scores.slice(s![i, j, r, ..]));
                let p = probs[target.get(r, i, j).to_index()].max(f32::MIN_POSITIVE);
                let ce = -p.ln();
                total += ce;
                if focal {
                    total += (1.0 - p).powf(FOCAL_GAMMA) * ce;
                }
            }
        }
    }
    Ok(total / denom as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onerel::tags::Tag;
    use rex_core::EncoderConfig;
    use rex_nn::TransformerEncoder;

    fn model(relations: usize) -> OneRelModel {
        let encoder = TransformerEncoder::new(
            EncoderConfig {
                vocab_size: 50,
                hidden_size: 8,
                num_layers: 1,
                num_heads: 2,
                intermediate_size: 16,
                max_positions: 16,
                ..EncoderConfig::default()
            },
            3,
        )
        .unwrap();
        OneRelModel::new(
            Arc::new(encoder),
            &OneRelConfig {
                relation_number: relations,
                ..OneRelConfig::default()
            },
        )
    }

    #[test]
    fn test_forward_shape_and_determinism() {
        let m = model(3);
        let ids = [1, 5, 7, 2];
        let mask = [true; 4];
        let mut rng = StdRng::seed_from_u64(1);
        let a = m.forward(&ids, &mask, Mode::Eval, &mut rng).unwrap();
        let b = m.forward(&ids, &mask, Mode::Eval, &mut rng).unwrap();
        assert_eq!(a.dim(), (4, 4, 3, TAG_SIZE));
        assert_eq!(a, b);
        let cube = m.predict(&ids, &mask).unwrap();
        assert_eq!((cube.relations(), cube.len()), (3, 4));
    }

    #[test]
    fn test_loss_prefers_correct_logits() {
        let mut target = TagCube::new(1, 2);
        target.set(0, 0, 1, Tag::HbTb).unwrap();
        let mut good = Array4::<f32>::zeros((2, 2, 1, TAG_SIZE));
        for i in 0..2 {
            for j in 0..2 {
                good[[i, j, 0, target.get(0, i, j).to_index()]] = 5.0;
            }
        }
        let bad = Array4::<f32>::zeros((2, 2, 1, TAG_SIZE));
        let mask = LossMask::ones(2);
        let good_loss = table_loss(&good, &target, &mask, true).unwrap();
        let bad_loss = table_loss(&bad, &target, &mask, true).unwrap();
        assert!(good_loss < bad_loss);
        // uniform logits: CE = ln 4 per cell, focal adds (3/4)^2 ln 4
        let expected = 4.0f32.ln() * (1.0 + 0.5625);
        assert!((bad_loss - expected).abs() < 1e-5);
    }

    #[test]
    fn test_empty_mask_gives_zero_loss() {
        let target = TagCube::new(1, 2);
        let scores = Array4::<f32>::zeros((2, 2, 1, TAG_SIZE));
        let mask = LossMask::from_attention(&[false, false]);
        assert_eq!(table_loss(&scores, &target, &mask, false).unwrap(), 0.0);
    }
}
