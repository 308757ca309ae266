//! Node Reordering & Batching
//!
//! Nodes of a batch are first stacked type-major into a [`NodeArena`]
//! (entities of every document, then mentions, then sentences). An
//! [`OffsetTable`] built from the section counts gives the gather index
//! that restacks the arena document-major into a [`NodeBatch`].

use crate::nodes::DocumentNodes;
use ndarray::{concatenate, s, Array2, Array3, ArrayView2, Axis};
use rex_core::{NodeRecord, NodeType, RexError, Result, Section};

/// Per-document offsets into the type-major arena and the document-major batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetTable {
    sections: Vec<Section>,
    /// `type_starts[t][b]`: arena row of the first node of type `t` in document `b`
    type_starts: [Vec<usize>; 3],
    /// Batch row of the first node of document `b`
    doc_starts: Vec<usize>,
    total: usize,
}

impl OffsetTable {
    pub fn new(sections: &[Section]) -> Self {
        let mut type_starts: [Vec<usize>; 3] = Default::default();
        let mut cursor = 0;
        for node_type in NodeType::ALL {
            for section in sections {
                type_starts[node_type.index()].push(cursor);
                cursor += section.count(node_type);
            }
        }

        let mut doc_starts = Vec::with_capacity(sections.len());
        let mut start = 0;
        for section in sections {
            doc_starts.push(start);
            start += section.total();
        }

        Self {
            sections: sections.to_vec(),
            type_starts,
            doc_starts,
            total: cursor,
        }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Batch row of the first node of `doc`
    pub fn doc_start(&self, doc: usize) -> usize {
        self.doc_starts[doc]
    }

    /// Check that the section counts describe exactly `len` nodes
    pub fn check(&self, len: usize) -> Result<()> {
        let mut cumulative = 0;
        for (doc, section) in self.sections.iter().enumerate() {
            cumulative += section.total();
            if cumulative > len {
                return Err(RexError::SectionMismatch {
                    document: doc,
                    expected: cumulative,
                    actual: len,
                });
            }
        }
        if cumulative != len {
            return Err(RexError::SectionMismatch {
                document: self.sections.len().saturating_sub(1),
                expected: cumulative,
                actual: len,
            });
        }
        Ok(())
    }

    /// Arena rows in document-major order
    pub fn gather_index(&self) -> Vec<usize> {
        let mut index = Vec::with_capacity(self.total);
        for (doc, section) in self.sections.iter().enumerate() {
            for node_type in NodeType::ALL {
                let start = self.type_starts[node_type.index()][doc];
                index.extend(start..start + section.count(node_type));
            }
        }
        index
    }
}

// ============================================================================
// Arena
// ============================================================================

/// Type-major node storage for a whole batch
#[derive(Debug, Clone)]
pub struct NodeArena {
    nodes: Array2<f32>,
    records: Vec<NodeRecord>,
    offsets: OffsetTable,
}

impl NodeArena {
    /// Wrap type-major nodes; fails if the section counts do not cover them exactly
    pub fn new(nodes: Array2<f32>, records: Vec<NodeRecord>, sections: &[Section]) -> Result<Self> {
        if records.len() != nodes.nrows() {
            return Err(RexError::shape("node records", nodes.nrows(), records.len()));
        }
        let offsets = OffsetTable::new(sections);
        offsets.check(nodes.nrows())?;
        Ok(Self {
            nodes,
            records,
            offsets,
        })
    }

    /// Stack per-document nodes type-major
    pub fn from_documents(docs: &[DocumentNodes]) -> Result<Self> {
        let dim = docs.first().map(DocumentNodes::dim).unwrap_or(0);
        let mut blocks: Vec<ArrayView2<'_, f32>> = Vec::new();
        let mut records = Vec::new();
        for node_type in NodeType::ALL {
            for doc in docs {
                let block = doc.of_type(node_type);
                if block.ncols() != dim {
                    return Err(RexError::shape("node width", dim, block.ncols()));
                }
                blocks.push(block.view());
                let section = doc.section();
                let offset = section.offset(node_type);
                let count = section.count(node_type);
                let slice = doc.records.get(offset..offset + count).ok_or_else(|| {
                    RexError::shape("document records", section.total(), doc.records.len())
                })?;
                records.extend_from_slice(slice);
            }
        }
        let nodes = if blocks.is_empty() {
            Array2::zeros((0, dim))
        } else {
            concatenate(Axis(0), &blocks)
                .map_err(|e| RexError::shape("node arena", "stackable blocks", e))?
        };
        let sections: Vec<Section> = docs.iter().map(DocumentNodes::section).collect();
        Self::new(nodes, records, &sections)
    }

    pub fn len(&self) -> usize {
        self.nodes.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn nodes(&self) -> &Array2<f32> {
        &self.nodes
    }

    pub fn records(&self) -> &[NodeRecord] {
        &self.records
    }

    /// Concatenate extra per-node features (e.g. a type embedding) to every row
    pub fn with_features(mut self, features: &Array2<f32>) -> Result<Self> {
        if features.nrows() != self.len() {
            return Err(RexError::shape("node features", self.len(), features.nrows()));
        }
        self.nodes = concatenate(Axis(1), &[self.nodes.view(), features.view()])
            .map_err(|e| RexError::shape("node features", "matching rows", e))?;
        Ok(self)
    }

    /// Restack document-major
    pub fn reorder(&self) -> NodeBatch {
        let index = self.offsets.gather_index();
        NodeBatch {
            nodes: self.nodes.select(Axis(0), &index),
            records: index.iter().map(|&i| self.records[i]).collect(),
            offsets: self.offsets.clone(),
        }
    }
}

// ============================================================================
// Document-major batch
// ============================================================================

/// Nodes in document-major order (entities, mentions, sentences per document)
#[derive(Debug, Clone)]
pub struct NodeBatch {
    nodes: Array2<f32>,
    records: Vec<NodeRecord>,
    offsets: OffsetTable,
}

impl NodeBatch {
    pub fn batch_size(&self) -> usize {
        self.offsets.sections.len()
    }

    pub fn nodes(&self) -> &Array2<f32> {
        &self.nodes
    }

    pub fn records(&self) -> &[NodeRecord] {
        &self.records
    }

    pub fn section(&self, doc: usize) -> Section {
        self.offsets.sections[doc]
    }

    pub fn max_nodes(&self) -> usize {
        self.offsets
            .sections
            .iter()
            .map(Section::total)
            .max()
            .unwrap_or(0)
    }

    /// Node rows of one document
    pub fn document(&self, doc: usize) -> ArrayView2<'_, f32> {
        let start = self.offsets.doc_start(doc);
        self.nodes
            .slice(s![start..start + self.section(doc).total(), ..])
    }

    /// Records of one document
    pub fn document_records(&self, doc: usize) -> &[NodeRecord] {
        let start = self.offsets.doc_start(doc);
        &self.records[start..start + self.section(doc).total()]
    }

    /// Zero-padded `(B, max_nodes, dim)` view
    pub fn padded_nodes(&self) -> Array3<f32> {
        let mut out = Array3::zeros((self.batch_size(), self.max_nodes(), self.nodes.ncols()));
        for doc in 0..self.batch_size() {
            let rows = self.document(doc);
            out.slice_mut(s![doc, ..rows.nrows(), ..]).assign(&rows);
        }
        out
    }

    /// `(B, max_nodes, 3)` records with `-1` in padded rows
    pub fn padded_records(&self) -> Array3<i64> {
        let mut out = Array3::from_elem((self.batch_size(), self.max_nodes(), 3), NodeRecord::PADDING);
        for doc in 0..self.batch_size() {
            for (i, record) in self.document_records(doc).iter().enumerate() {
                for (k, v) in record.to_row().into_iter().enumerate() {
                    out[[doc, i, k]] = v;
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(node_type: NodeType, tag: i64) -> NodeRecord {
        NodeRecord {
            node_type,
            semantic_type: tag,
            sentence_id: 0,
        }
    }

    /// Type-major arena whose node value encodes (document, type, position)
    fn tagged_arena(sections: &[Section]) -> Result<NodeArena> {
        let mut values = Vec::new();
        let mut records = Vec::new();
        for node_type in NodeType::ALL {
            for (doc, section) in sections.iter().enumerate() {
                for i in 0..section.count(node_type) {
                    let tag = (doc * 10_000 + node_type.index() * 1_000 + i) as i64;
                    values.push(tag as f32);
                    records.push(record(node_type, tag));
                }
            }
        }
        let nodes = Array2::from_shape_vec((values.len(), 1), values).unwrap();
        NodeArena::new(nodes, records, sections)
    }

    #[test]
    fn test_reorder_document_major() {
        let sections = [Section::new(1, 2, 1), Section::new(2, 1, 1)];
        let batch = tagged_arena(&sections).unwrap().reorder();
        let order: Vec<i64> = batch.records().iter().map(|r| r.semantic_type).collect();
        assert_eq!(
            order,
            vec![0, 1000, 1001, 2000, 10000, 10001, 11000, 12000]
        );
        assert_eq!(batch.document(1).nrows(), 4);
        assert_eq!(batch.document(1)[[0, 0]], 10000.0);
    }

    #[test]
    fn test_section_mismatch_fails_fast() {
        let nodes = Array2::zeros((5, 2));
        let records = vec![record(NodeType::Entity, 0); 5];
        let err = NodeArena::new(nodes, records, &[Section::new(1, 1, 1), Section::new(1, 1, 1)])
            .unwrap_err();
        assert!(matches!(
            err,
            RexError::SectionMismatch { document: 1, expected: 6, actual: 5 }
        ));

        let nodes = Array2::zeros((7, 2));
        let records = vec![record(NodeType::Entity, 0); 7];
        assert!(NodeArena::new(nodes, records, &[Section::new(1, 1, 1)]).is_err());
    }

    #[test]
    fn test_padded_views() {
        let sections = [Section::new(1, 1, 1), Section::new(2, 2, 1)];
        let batch = tagged_arena(&sections).unwrap().reorder();
        let nodes = batch.padded_nodes();
        let records = batch.padded_records();
        assert_eq!(nodes.dim(), (2, 5, 1));
        assert_eq!(records.dim(), (2, 5, 3));
        assert_eq!(records[[0, 3, 0]], -1);
        assert_eq!(records[[0, 4, 2]], -1);
        assert_eq!(nodes[[0, 4, 0]], 0.0);
        assert_eq!(records[[1, 4, 0]], 2);
    }

    proptest! {
        #[test]
        fn prop_reorder_is_bijection(
            raw in proptest::collection::vec((0usize..4, 0usize..6, 0usize..4), 0..6)
        ) {
            let sections: Vec<Section> =
                raw.iter().map(|&(e, m, s)| Section::new(e, m, s)).collect();
            let offsets = OffsetTable::new(&sections);
            let mut index = offsets.gather_index();
            prop_assert_eq!(index.len(), offsets.total());
            index.sort_unstable();
            prop_assert_eq!(index, (0..offsets.total()).collect::<Vec<_>>());

            let batch = tagged_arena(&sections).unwrap().reorder();
            for (doc, section) in sections.iter().enumerate() {
                let records = batch.document_records(doc);
                for node_type in NodeType::ALL {
                    let offset = section.offset(node_type);
                    for i in 0..section.count(node_type) {
                        let expected = (doc * 10_000 + node_type.index() * 1_000 + i) as i64;
                        prop_assert_eq!(records[offset + i].semantic_type, expected);
                    }
                }
            }
        }
    }
}
