//! REX Extractor - relation extraction models
//!
//! Implements document-level graph relation extraction (GLRE),
//! table-filling triple extraction (OneRel) and the span-pair
//! marker dataset pipeline (PLMarker), plus their evaluation.

use rex_core::Result;

/// Trait for relation extractors
pub trait RelationExtractor: Send + Sync {
    type Input;
    type Output;

    fn extract(&self, input: &Self::Input) -> Result<Vec<Self::Output>>;
}

pub mod glre;
pub mod metrics;
pub mod onerel;
pub mod plmarker;
pub mod tokenizer;

pub use glre::{GlreBatch, GlreExtractor, GlreModel, PairPrediction};
pub use metrics::{AggregateMetrics, MarkerMetrics, TripleEvaluator, TripleMetrics, ValidationRecord, ValidationWriter};
pub use onerel::{OneRelExtractor, OneRelModel, TableDecoder, TargetBuilder};
pub use plmarker::{FeaturePacker, MarkerDataset, MarkerDocument, MarkerExampleBuilder};
pub use tokenizer::{BasicTokenizer, Tokenizer};
