//! Training targets for the table-filling model

use super::tags::{LossMask, Tag, TagCube};
use crate::tokenizer::Tokenizer;
use rex_core::{OneRelRelations, RelationTriple, Result, RexError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// One raw example: `{"text": ..., "triple_list": [[sub, rel, obj], ...]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneRelExample {
    pub text: String,
    #[serde(default)]
    pub triple_list: Vec<[String; 3]>,
}

/// Model-ready sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneRelSample {
    pub token_ids: Vec<usize>,
    pub attention_mask: Vec<bool>,
    pub loss_mask: LossMask,
    /// Character span of every token in `text`
    pub offsets: Vec<(usize, usize)>,
    pub target: TagCube,
    /// Lowercased gold triples
    pub triples: Vec<RelationTriple>,
    pub tokens: Vec<String>,
    /// Lowercased source text
    pub text: String,
}

impl OneRelSample {
    pub fn len(&self) -> usize {
        self.token_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_ids.is_empty()
    }
}

/// First index `>= start` where `target` occurs as a contiguous run of `source`
pub fn find_head_idx<T: PartialEq>(source: &[T], target: &[T], start: usize) -> Option<usize> {
    if target.is_empty() || target.len() > source.len() {
        return None;
    }
    (start..=source.len() - target.len()).find(|&i| source[i..i + target.len()] == *target)
}

/// Token spans (inclusive) of a subject/object pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    head: usize,
    tail: usize,
}

/// Builds [`OneRelSample`]s from raw examples
pub struct TargetBuilder {
    tokenizer: Arc<dyn Tokenizer>,
    relations: Arc<OneRelRelations>,
    max_len: usize,
}

impl TargetBuilder {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, relations: Arc<OneRelRelations>, max_len: usize) -> Self {
        Self {
            tokenizer,
            relations,
            max_len,
        }
    }

    /// Locate every triple in the token sequence, grouped by subject span.
    ///
    /// Subjects keep the order in which they first appear in `triples`.
    /// Triples whose subject or object cannot be found are skipped.
    fn locate(
        &self,
        tokens: &[String],
        triples: &[[String; 3]],
    ) -> Result<Vec<(Span, Vec<(Span, usize)>)>> {
        let mut located: Vec<(Span, Vec<(Span, usize)>)> = Vec::new();
        for [subject, relation, object] in triples {
            let sub = self.tokenizer.tokenize_words(subject);
            let obj = self.tokenizer.tokenize_words(object);
            let Some(sub_head) = find_head_idx(tokens, &sub, 0) else {
                debug!(%subject, "subject not found in text");
                continue;
            };
            let Some(obj_head) = find_head_idx(tokens, &obj, sub_head + sub.len())
                .or_else(|| find_head_idx(tokens, &obj, 0))
            else {
                debug!(%object, "object not found in text");
                continue;
            };
            let relation_id = self
                .relations
                .id(relation)
                .ok_or_else(|| RexError::Vocabulary(format!("unknown relation '{relation}'")))?;
            let subject_span = Span {
                head: sub_head,
                tail: sub_head + sub.len() - 1,
            };
            let object_span = Span {
                head: obj_head,
                tail: obj_head + obj.len() - 1,
            };
            match located.iter_mut().find(|(span, _)| *span == subject_span) {
                Some((_, objects)) => objects.push((object_span, relation_id)),
                None => located.push((subject_span, vec![(object_span, relation_id)])),
            }
        }
        Ok(located)
    }

    fn lowercased(triples: &[[String; 3]]) -> Vec<RelationTriple> {
        triples
            .iter()
            .map(|t| RelationTriple::from(t.clone()).lowercased())
            .collect()
    }

    /// Training sample, or `None` when no gold triple can be located
    pub fn build_train(&self, example: &OneRelExample) -> Result<Option<OneRelSample>> {
        let encoding = self.tokenizer.encode(&example.text, self.max_len);
        let located = self.locate(&encoding.tokens, &example.triple_list)?;
        if located.is_empty() {
            return Ok(None);
        }

        let len = encoding.len();
        let mut target = TagCube::new(self.relations.len(), len);
        for (sub, objects) in &located {
            for &(obj, relation) in objects {
                // HE-TE, then HB-TE, then HB-TB: later writes win on shared cells
                target.set(relation, sub.tail, obj.tail, Tag::HeTe)?;
                target.set(relation, sub.head, obj.tail, Tag::HbTe)?;
                target.set(relation, sub.head, obj.head, Tag::HbTb)?;
            }
        }

        Ok(Some(OneRelSample {
            attention_mask: encoding.attention_mask(),
            loss_mask: LossMask::ones(len),
            token_ids: encoding.ids,
            offsets: encoding.offsets,
            target,
            triples: Self::lowercased(&example.triple_list),
            tokens: encoding.tokens,
            text: example.text.to_lowercase(),
        }))
    }

    /// Evaluation sample with an empty target and a padding-aware loss mask
    pub fn build_eval(&self, example: &OneRelExample) -> OneRelSample {
        let encoding = self.tokenizer.encode(&example.text, self.max_len);
        let attention_mask = encoding.attention_mask();
        OneRelSample {
            loss_mask: LossMask::from_attention(&attention_mask),
            target: TagCube::new(self.relations.len(), encoding.len()),
            attention_mask,
            token_ids: encoding.ids,
            offsets: encoding.offsets,
            triples: Self::lowercased(&example.triple_list),
            tokens: encoding.tokens,
            text: example.text.to_lowercase(),
        }
    }

    /// Build a whole split; training drops examples without locatable triples
    pub fn build_all(&self, examples: &[OneRelExample], training: bool) -> Result<Vec<OneRelSample>> {
        let mut samples = Vec::with_capacity(examples.len());
        for example in examples {
            if training {
                samples.extend(self.build_train(example)?);
            } else {
                samples.push(self.build_eval(example));
            }
        }
        info!(
            examples = examples.len(),
            samples = samples.len(),
            training,
            "Built OneRel samples"
        );
        Ok(samples)
    }
}
