//! REX Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout REX:
//! - Mention and graph-node records
//! - Section counts and relation labels
//! - Common error types
//! - Immutable vocabularies (entity types, relations)
//! - Configuration management

pub mod config;
pub mod vocab;

pub use config::{
    ConfigError, DatasetKind, EncoderConfig, GlreConfig, LoggingConfig, OneRelConfig,
    OutputConfig, PlMarkerConfig, Pooling, QueryMode, RexConfig,
};
pub use vocab::{
    MarkerRelationSchema, OneRelRelations, RelationSchemaFile, Vocabularies, Vocabulary,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for REX operations
#[derive(Error, Debug)]
pub enum RexError {
    #[error("Shape mismatch in {context}: expected {expected}, got {actual}")]
    Shape {
        context: String,
        expected: String,
        actual: String,
    },

    #[error("Section counts of document {document} sum to {expected} but {actual} nodes were provided")]
    SectionMismatch {
        document: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Mention {mention} ends at word {end} but only {len} words were encoded")]
    SpanOutOfRange {
        mention: usize,
        end: usize,
        len: usize,
    },

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Vocabulary error: {0}")]
    Vocabulary(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RexError {
    /// Build a shape error from anything printable
    pub fn shape(
        context: impl Into<String>,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        Self::Shape {
            context: context.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

impl From<ConfigError> for RexError {
    fn from(e: ConfigError) -> Self {
        Self::ConfigError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RexError>;

// ============================================================================
// Graph Node Records
// ============================================================================

/// Kind of a document-graph node
///
/// The discriminant doubles as the node-type id used by the type embedding
/// and by the padded record tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Entity = 0,
    Mention = 1,
    Sentence = 2,
}

impl NodeType {
    /// Canonical per-document order: entities, then mentions, then sentences
    pub const ALL: [NodeType; 3] = [NodeType::Entity, NodeType::Mention, NodeType::Sentence];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(idx: i64) -> Option<Self> {
        match idx {
            0 => Some(Self::Entity),
            1 => Some(Self::Mention),
            2 => Some(Self::Sentence),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entity => write!(f, "entity"),
            Self::Mention => write!(f, "mention"),
            Self::Sentence => write!(f, "sentence"),
        }
    }
}

/// Type/position record attached to every graph node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_type: NodeType,
    /// Semantic (entity) type id, `-1` for sentence nodes
    pub semantic_type: i64,
    /// Sentence index inside the document
    pub sentence_id: i64,
}

impl NodeRecord {
    /// Value written into padded record rows
    pub const PADDING: i64 = -1;

    /// Row layout used by padded record tensors: node type | semantic type | sentence id
    pub fn to_row(&self) -> [i64; 3] {
        [
            self.node_type.index() as i64,
            self.semantic_type,
            self.sentence_id,
        ]
    }
}

// ============================================================================
// Documents
// ============================================================================

/// One surface occurrence of an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    /// Document-local entity id (`0..entity_count`)
    pub entity_id: usize,
    /// Semantic type id from the entity-type vocabulary
    pub entity_type: i64,
    /// First word of the span (inclusive)
    pub start: usize,
    /// End of the span (exclusive)
    pub end: usize,
    /// Sentence that contains the mention
    pub sentence_id: usize,
}

impl Mention {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clip the span to a document of `word_len` words.
    ///
    /// Used by preprocessing; the node builder itself rejects out-of-range spans.
    pub fn clipped(&self, word_len: usize) -> Self {
        let start = self.start.min(word_len.saturating_sub(1));
        let end = self.end.min(word_len).max(start + 1).min(word_len.max(1));
        Self {
            start,
            end,
            ..self.clone()
        }
    }
}

/// Per-document node counts: (#entities, #mentions, #sentences)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub entities: usize,
    pub mentions: usize,
    pub sentences: usize,
}

impl Section {
    pub fn new(entities: usize, mentions: usize, sentences: usize) -> Self {
        Self {
            entities,
            mentions,
            sentences,
        }
    }

    /// Total node count of the document
    pub fn total(&self) -> usize {
        self.entities + self.mentions + self.sentences
    }

    /// Count for one node type
    pub fn count(&self, node_type: NodeType) -> usize {
        match node_type {
            NodeType::Entity => self.entities,
            NodeType::Mention => self.mentions,
            NodeType::Sentence => self.sentences,
        }
    }

    /// Offset of the first node of `node_type` inside the document block
    pub fn offset(&self, node_type: NodeType) -> usize {
        match node_type {
            NodeType::Entity => 0,
            NodeType::Mention => self.entities,
            NodeType::Sentence => self.entities + self.mentions,
        }
    }
}

/// Count entities in a mention list, validating contiguous ids
pub fn entity_count(mentions: &[Mention]) -> Result<usize> {
    let ids: BTreeSet<usize> = mentions.iter().map(|m| m.entity_id).collect();
    let count = ids.iter().next_back().map(|max| max + 1).unwrap_or(0);
    if ids.len() != count {
        let missing: Vec<usize> = (0..count).filter(|id| !ids.contains(id)).collect();
        return Err(RexError::InvalidDocument(format!(
            "entity ids {missing:?} have no mentions"
        )));
    }
    Ok(count)
}

// ============================================================================
// Triples
// ============================================================================

/// A (subject, relation, object) triple in surface form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationTriple {
    pub subject: String,
    pub relation: String,
    pub object: String,
}

impl RelationTriple {
    pub fn new(
        subject: impl Into<String>,
        relation: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            relation: relation.into(),
            object: object.into(),
        }
    }

    /// Lowercased copy, used when comparing against lowercased gold triples
    pub fn lowercased(&self) -> Self {
        Self {
            subject: self.subject.to_lowercase(),
            relation: self.relation.to_lowercase(),
            object: self.object.to_lowercase(),
        }
    }
}

impl From<[String; 3]> for RelationTriple {
    fn from([subject, relation, object]: [String; 3]) -> Self {
        Self {
            subject,
            relation,
            object,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mention(entity_id: usize, start: usize, end: usize, sentence_id: usize) -> Mention {
        Mention {
            entity_id,
            entity_type: 1,
            start,
            end,
            sentence_id,
        }
    }

    #[test]
    fn test_section_offsets() {
        let section = Section::new(2, 5, 3);
        assert_eq!(section.total(), 10);
        assert_eq!(section.offset(NodeType::Entity), 0);
        assert_eq!(section.offset(NodeType::Mention), 2);
        assert_eq!(section.offset(NodeType::Sentence), 7);
        assert_eq!(section.count(NodeType::Sentence), 3);
    }

    #[test]
    fn test_entity_count_contiguous() {
        let mentions = vec![mention(0, 0, 1, 0), mention(1, 2, 3, 0), mention(0, 5, 6, 1)];
        assert_eq!(entity_count(&mentions).unwrap(), 2);
    }

    #[test]
    fn test_entity_count_gap_is_error() {
        let mentions = vec![mention(0, 0, 1, 0), mention(2, 2, 3, 0)];
        assert!(matches!(
            entity_count(&mentions),
            Err(RexError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_mention_clipped() {
        let m = mention(0, 8, 14, 0).clipped(10);
        assert_eq!((m.start, m.end), (8, 10));

        let m = mention(0, 12, 14, 0).clipped(10);
        assert_eq!((m.start, m.end), (9, 10));
    }

    #[test]
    fn test_node_record_row() {
        let record = NodeRecord {
            node_type: NodeType::Sentence,
            semantic_type: -1,
            sentence_id: 3,
        };
        assert_eq!(record.to_row(), [2, -1, 3]);
        assert_eq!(NodeType::from_index(1), Some(NodeType::Mention));
        assert_eq!(NodeType::from_index(-1), None);
    }
}
