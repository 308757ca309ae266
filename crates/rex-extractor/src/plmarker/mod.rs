//! PLMarker span-pair examples
//!
//! A sentence window is marked around one subject entity and every candidate
//! object is attached as a pair of levitated markers that share the object's
//! boundary positions.

pub mod document;
pub mod examples;
pub mod packing;

pub use document::{MarkerDocument, NerSpan, RelationSpan};
pub use examples::{
    context_window, shift_object, GoldEntity, GoldPair, GoldSets, GoldTypedPair, MarkerDataset, MarkerExample,
    MarkerExampleBuilder, ObjectCandidate, SentenceIndex, SubjectMarker, NIL_POSITION,
};
pub use packing::{FeaturePacker, MarkerFeatures, ALBERT_PAIR_MARKER_IDS, PAIR_MARKER_IDS};
