//! Serialisable GLRE batch input

use ndarray::Array2;
use rex_core::{entity_count, Mention, Result, RexError, Section};
use rex_graph::RelationAdjacency;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Gold relations of one ordered entity pair, as relation ids
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairLabel {
    pub head: usize,
    pub tail: usize,
    pub relations: Vec<usize>,
}

/// One preprocessed document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlreDocument {
    pub id: String,
    /// Sub-word ids of the whole document
    pub token_ids: Vec<usize>,
    /// Real-token mask; empty means every token is real
    #[serde(default)]
    pub attention_mask: Vec<bool>,
    /// `true` at the first sub-word of every word
    pub token_starts: Vec<bool>,
    /// Words per sentence
    pub sentence_lengths: Vec<usize>,
    pub mentions: Vec<Mention>,
    /// Declared node counts; checked against the mentions when present
    #[serde(default)]
    pub section: Option<Section>,
    /// Typed edges over the document's nodes in canonical order
    pub adjacency: RelationAdjacency,
    /// Directed sentence distance `tail - head` per entity pair
    #[serde(default)]
    pub distances: Option<Vec<Vec<i64>>>,
    /// Gold labels; `None` at inference time
    #[serde(default)]
    pub labels: Option<Vec<PairLabel>>,
}

impl GlreDocument {
    pub fn word_count(&self) -> usize {
        self.sentence_lengths.iter().sum()
    }

    pub fn attention_mask(&self) -> Vec<bool> {
        if self.attention_mask.is_empty() {
            vec![true; self.token_ids.len()]
        } else {
            self.attention_mask.clone()
        }
    }

    /// Section counts derived from mentions and sentences
    pub fn derived_section(&self) -> Result<Section> {
        Ok(Section::new(
            entity_count(&self.mentions)?,
            self.mentions.len(),
            self.sentence_lengths.len(),
        ))
    }

    /// Distance matrix, if one was supplied, as an `(E, E)` array
    pub fn distance_matrix(&self, entities: usize) -> Result<Option<Array2<i64>>> {
        let Some(rows) = &self.distances else {
            return Ok(None);
        };
        if rows.len() != entities || rows.iter().any(|r| r.len() != entities) {
            return Err(RexError::shape(
                format!("distance matrix of document {}", self.id),
                format!("{entities}x{entities}"),
                format!("{} rows", rows.len()),
            ));
        }
        Ok(Some(Array2::from_shape_fn((entities, entities), |(h, t)| rows[h][t])))
    }

    /// Check the structural invariants of one document
    pub fn validate(&self, index: usize, edge_types: usize) -> Result<Section> {
        if self.token_starts.len() != self.token_ids.len() {
            return Err(RexError::shape(
                format!("token starts of document {}", self.id),
                self.token_ids.len(),
                self.token_starts.len(),
            ));
        }
        if !self.attention_mask.is_empty() && self.attention_mask.len() != self.token_ids.len() {
            return Err(RexError::shape(
                format!("attention mask of document {}", self.id),
                self.token_ids.len(),
                self.attention_mask.len(),
            ));
        }

        let derived = self.derived_section()?;
        if let Some(declared) = self.section {
            if declared != derived {
                return Err(RexError::SectionMismatch {
                    document: index,
                    expected: declared.total(),
                    actual: derived.total(),
                });
            }
        }

        self.adjacency.validate()?;
        if self.adjacency.relation_count() != edge_types {
            return Err(RexError::shape(
                format!("edge types of document {}", self.id),
                edge_types,
                self.adjacency.relation_count(),
            ));
        }
        if self.adjacency.node_count() != derived.total() {
            return Err(RexError::SectionMismatch {
                document: index,
                expected: derived.total(),
                actual: self.adjacency.node_count(),
            });
        }

        if let Some(labels) = &self.labels {
            if let Some(bad) = labels
                .iter()
                .find(|l| l.head >= derived.entities || l.tail >= derived.entities)
            {
                return Err(RexError::InvalidDocument(format!(
                    "label ({}, {}) of document {} names a missing entity",
                    bad.head, bad.tail, self.id
                )));
            }
        }
        Ok(derived)
    }
}

/// Documents processed together in one forward pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlreBatch {
    pub documents: Vec<GlreDocument>,
}

impl GlreBatch {
    pub fn new(documents: Vec<GlreDocument>) -> Self {
        Self { documents }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| RexError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Validate every document and return their section counts
    pub fn validate(&self, edge_types: usize) -> Result<Vec<Section>> {
        self.documents
            .iter()
            .enumerate()
            .map(|(i, doc)| doc.validate(i, edge_types))
            .collect()
    }

    /// Whether any document carries gold labels
    pub fn has_labels(&self) -> bool {
        self.documents.iter().any(|d| d.labels.is_some())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rex_graph::SparseMatrix;

    pub(crate) fn mention(entity_id: usize, entity_type: i64, start: usize, end: usize, sentence_id: usize) -> Mention {
        Mention {
            entity_id,
            entity_type,
            start,
            end,
            sentence_id,
        }
    }

    /// Two sentences of 3 words, three entities, six sub-words
    pub(crate) fn sample_document() -> GlreDocument {
        let mentions = vec![
            mention(0, 1, 0, 1, 0),
            mention(1, 2, 2, 3, 0),
            mention(2, 1, 3, 5, 1),
            mention(0, 1, 5, 6, 1),
        ];
        let nodes = 3 + 4 + 2;
        let mut matrices = vec![SparseMatrix::new(nodes); 5];
        // mention-entity edges
        for (m, e) in [(3, 0), (4, 1), (5, 2), (6, 0)] {
            matrices[0].push(m, e, 1.0).unwrap();
            matrices[0].push(e, m, 1.0).unwrap();
        }
        // mention-sentence edges
        for (m, s) in [(3, 7), (4, 7), (5, 8), (6, 8)] {
            matrices[1].push(m, s, 1.0).unwrap();
        }
        matrices[2].push(7, 8, 1.0).unwrap();
        GlreDocument {
            id: "doc-0".to_string(),
            token_ids: vec![1, 7, 8, 9, 10, 11, 12, 2],
            attention_mask: Vec::new(),
            token_starts: vec![false, true, true, true, true, false, true, false],
            sentence_lengths: vec![3, 3],
            mentions,
            section: Some(Section::new(3, 4, 2)),
            adjacency: RelationAdjacency::new(matrices).unwrap(),
            distances: None,
            labels: Some(vec![PairLabel {
                head: 0,
                tail: 2,
                relations: vec![1],
            }]),
        }
    }

    #[test]
    fn test_valid_document() {
        let doc = sample_document();
        assert_eq!(doc.validate(0, 5).unwrap(), Section::new(3, 4, 2));
        assert_eq!(doc.word_count(), 6);
        assert_eq!(doc.attention_mask().len(), 8);
    }

    #[test]
    fn test_declared_section_mismatch() {
        let mut doc = sample_document();
        doc.section = Some(Section::new(3, 5, 2));
        assert!(matches!(
            doc.validate(4, 5),
            Err(RexError::SectionMismatch { document: 4, .. })
        ));
    }

    #[test]
    fn test_adjacency_size_must_cover_nodes() {
        let mut doc = sample_document();
        doc.adjacency = RelationAdjacency::empty(5, 8);
        assert!(doc.validate(0, 5).is_err());
        doc.adjacency = RelationAdjacency::empty(4, 9);
        assert!(doc.validate(0, 5).is_err());
    }

    #[test]
    fn test_label_entity_out_of_range() {
        let mut doc = sample_document();
        doc.labels = Some(vec![PairLabel {
            head: 0,
            tail: 3,
            relations: vec![1],
        }]);
        assert!(matches!(doc.validate(0, 5), Err(RexError::InvalidDocument(_))));
    }

    #[test]
    fn test_batch_json_round_trip() {
        let batch = GlreBatch::new(vec![sample_document()]);
        let json = serde_json::to_string(&batch).unwrap();
        let back: GlreBatch = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back.documents[0].mentions, batch.documents[0].mentions);
        assert!(back.has_labels());
    }
}
