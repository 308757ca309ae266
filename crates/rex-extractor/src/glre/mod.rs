//! GLRE document-level relation extraction
//!
//! Words from the token encoder become entity, mention and sentence nodes.
//! A relational GCN refines them over typed document edges, mention
//! attention adds local evidence, and every selected entity pair is scored
//! against the relation vocabulary.

pub mod batch;
pub mod distance;
pub mod encoder;
pub mod features;
pub mod local;
pub mod loss;
pub mod model;
pub mod select;
pub mod stages;

pub use batch::{GlreBatch, GlreDocument, PairLabel};
pub use distance::{bucket, directed_index, distance_matrix, mention_distance, DistanceFeature};
pub use encoder::{gather_word_starts, mention_contexts, WordEncoder};
pub use features::{DocumentFeatures, FeatureSource};
pub use local::{LocalInputs, LocalRepLayer};
pub use loss::{count_predictions, estimate_loss, truth_index, ClassCounts, PairTargets};
pub use model::{GlreEvaluation, GlreModel, GlreOutput, PairPrediction};
pub use select::{PairSelection, PairSelector, SelectionRule};
pub use stages::{Classifier, ContextAttention, Mlp, PairStage};

use crate::RelationExtractor;
use rex_core::Result;

/// Thresholded GLRE predictions over whole batches
pub struct GlreExtractor {
    model: GlreModel,
    threshold: f32,
}

impl GlreExtractor {
    /// Use the threshold from the model configuration
    pub fn new(model: GlreModel) -> Self {
        let threshold = model.config().threshold;
        Self { model, threshold }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn model(&self) -> &GlreModel {
        &self.model
    }
}

impl RelationExtractor for GlreExtractor {
    type Input = GlreBatch;
    type Output = PairPrediction;

    fn extract(&self, batch: &GlreBatch) -> Result<Vec<PairPrediction>> {
        self.model.predict(batch, self.threshold)
    }
}
