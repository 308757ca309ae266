//! OneRel table-filling relation extraction
//!
//! A sentence is scored as a `(relation, head_token, tail_token)` cube of
//! four tags. Training targets mark subject/object boundaries with
//! `HB-TB`, `HB-TE` and `HE-TE`; decoding walks the predicted cube back
//! into `(subject, relation, object)` strings.

pub mod decoder;
pub mod model;
pub mod tags;
pub mod target;

pub use decoder::{decode_entity, TableDecoder};
pub use model::{table_loss, OneRelModel, FOCAL_GAMMA};
pub use tags::{LossMask, Tag, TagCube, TAG_SIZE};
pub use target::{find_head_idx, OneRelExample, OneRelSample, TargetBuilder};

use crate::RelationExtractor;
use rex_core::{RelationTriple, Result};

/// Scorer plus decoder over pre-built samples
pub struct OneRelExtractor {
    model: OneRelModel,
    decoder: TableDecoder,
}

impl OneRelExtractor {
    pub fn new(model: OneRelModel, decoder: TableDecoder) -> Self {
        Self { model, decoder }
    }

    pub fn model(&self) -> &OneRelModel {
        &self.model
    }
}

impl RelationExtractor for OneRelExtractor {
    type Input = OneRelSample;
    type Output = RelationTriple;

    fn extract(&self, sample: &OneRelSample) -> Result<Vec<RelationTriple>> {
        let cube = self.model.predict(&sample.token_ids, &sample.attention_mask)?;
        self.decoder
            .decode_masked(cube, &sample.loss_mask, &sample.text, &sample.offsets)
    }
}
