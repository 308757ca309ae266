//! Fixed-size classifier inputs with levitated pair markers

use super::examples::{MarkerExample, SentenceIndex};
use crate::tokenizer::{Tokenizer, PAD_TOKEN};
use ndarray::{s, Array2};
use rex_core::{PlMarkerConfig, Result, RexError};
use serde::{Deserialize, Serialize};

/// Pair-marker ids for BERT-style vocabularies
pub const PAIR_MARKER_IDS: (usize, usize) = (3, 4);

/// Pair-marker ids for ALBERT vocabularies
pub const ALBERT_PAIR_MARKER_IDS: (usize, usize) = (30002, 30003);

/// One packed example of `S + 2P` positions
///
/// Positions `S..S+P` hold the left marker of every object and
/// `S+P..S+2P` the right marker; both share the object's boundary
/// position ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerFeatures {
    pub input_ids: Vec<usize>,
    /// `(S+2P, S+2P)`, true where attention is allowed
    pub attention_mask: Array2<bool>,
    pub position_ids: Vec<usize>,
    /// Subject marker positions
    pub subject_position: (usize, usize),
    /// `(left, right)` per object, `(0, 0)` in padding slots
    pub mention_pos: Vec<(usize, usize)>,
    /// Relation label per object, `-1` in padding slots
    pub labels: Vec<i64>,
    /// Object type per object, `-1` in padding slots
    pub ner_labels: Vec<i64>,
    pub subject_label: i64,
    pub index: SentenceIndex,
    /// Inclusive word spans of the real objects
    pub objects: Vec<(usize, usize)>,
}

/// Packs [`MarkerExample`]s into [`MarkerFeatures`]
pub struct FeaturePacker<'a> {
    tokenizer: &'a dyn Tokenizer,
    config: &'a PlMarkerConfig,
    type_count: usize,
}

impl<'a> FeaturePacker<'a> {
    pub fn new(tokenizer: &'a dyn Tokenizer, config: &'a PlMarkerConfig, type_count: usize) -> Self {
        Self {
            tokenizer,
            config,
            type_count,
        }
    }

    pub fn pack(&self, example: &MarkerExample) -> Result<MarkerFeatures> {
        let seq = self.config.max_seq_length;
        let pairs = self.config.max_pair_length;
        let count = example.objects.len();
        let len = example.tokens.len();
        if len > seq {
            return Err(RexError::shape("marked tokens", format!("at most {seq}"), len));
        }
        if count > pairs {
            return Err(RexError::shape("objects", format!("at most {pairs}"), count));
        }

        let pad = self.tokenizer.token_id(PAD_TOKEN);
        let (left_marker, right_marker) = if self.config.albert_markers {
            ALBERT_PAIR_MARKER_IDS
        } else {
            PAIR_MARKER_IDS
        };

        let mut input_ids: Vec<usize> = example.tokens.iter().map(|t| self.tokenizer.token_id(t)).collect();
        input_ids.resize(seq, pad);
        for marker in [left_marker, right_marker] {
            input_ids.extend(std::iter::repeat(marker).take(count));
            input_ids.extend(std::iter::repeat(pad).take(pairs - count));
        }

        let total = seq + 2 * pairs;
        let mut attention_mask = Array2::from_elem((total, total), false);
        attention_mask.slice_mut(s![..len, ..len]).fill(true);
        let mut position_ids: Vec<usize> = (0..seq).collect();
        position_ids.resize(total, 0);

        let mut mention_pos = Vec::with_capacity(pairs);
        let mut labels = Vec::with_capacity(pairs);
        let mut ner_labels = Vec::with_capacity(pairs);
        for (x, object) in example.objects.iter().enumerate() {
            let w1 = seq + x;
            let w2 = seq + pairs + x;
            position_ids[w1] = object.left;
            position_ids[w2] = object.right;
            for a in [w1, w2] {
                for b in [w1, w2] {
                    attention_mask[[a, b]] = true;
                }
                attention_mask.slice_mut(s![a, ..len]).fill(true);
            }
            mention_pos.push((object.left, object.right));
            labels.push(object.label as i64);
            ner_labels.push(object.ner_label as i64);

            if self.config.use_typemarker {
                let t = object.ner_label;
                input_ids[w1] = self
                    .tokenizer
                    .token_id(&format!("[unused{}]", 2 + t + 2 * self.type_count));
                input_ids[w2] = self
                    .tokenizer
                    .token_id(&format!("[unused{}]", 2 + t + 3 * self.type_count));
            }
        }

        if self.config.att_left {
            attention_mask
                .slice_mut(s![seq..seq + count, seq..seq + count])
                .fill(true);
        }
        if self.config.att_right {
            let start = seq + pairs;
            attention_mask
                .slice_mut(s![start..start + count, start..start + count])
                .fill(true);
        }

        mention_pos.resize(pairs, (0, 0));
        labels.resize(pairs, -1);
        ner_labels.resize(pairs, -1);

        Ok(MarkerFeatures {
            input_ids,
            attention_mask,
            position_ids,
            subject_position: example.subject.position,
            mention_pos,
            labels,
            ner_labels,
            subject_label: example.subject.label,
            index: example.index,
            objects: example.objects.iter().map(|o| o.span).collect(),
        })
    }

    pub fn pack_all(&self, examples: &[MarkerExample]) -> Result<Vec<MarkerFeatures>> {
        examples.iter().map(|e| self.pack(e)).collect()
    }
}
