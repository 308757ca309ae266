//! Node Builder
//!
//! Turns per-word vectors of one document into mention, entity and
//! sentence node vectors, together with the record of every node.

use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rex_core::{entity_count, Mention, NodeRecord, NodeType, Pooling, RexError, Result, Section};

// ============================================================================
// Pooling
// ============================================================================

fn pool_rows(rows: ArrayView2<'_, f32>, pooling: Pooling) -> Array1<f32> {
    match pooling {
        Pooling::Mean => rows
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(rows.ncols())),
        Pooling::Max => rows.fold_axis(Axis(0), f32::NEG_INFINITY, |&a, &b| a.max(b)),
    }
}

/// Pool the words of every mention span into one vector per mention
pub fn merge_tokens(
    words: &Array2<f32>,
    mentions: &[Mention],
    pooling: Pooling,
) -> Result<Array2<f32>> {
    let mut out = Array2::zeros((mentions.len(), words.ncols()));
    for (idx, mention) in mentions.iter().enumerate() {
        if mention.end > words.nrows() {
            return Err(RexError::SpanOutOfRange {
                mention: idx,
                end: mention.end,
                len: words.nrows(),
            });
        }
        if mention.is_empty() {
            return Err(RexError::InvalidDocument(format!(
                "mention {idx} has an empty span at word {}",
                mention.start
            )));
        }
        let span = words.slice(s![mention.start..mention.end, ..]);
        out.row_mut(idx).assign(&pool_rows(span, pooling));
    }
    Ok(out)
}

/// Pool mention vectors sharing an entity id into one vector per entity
pub fn merge_mentions(
    mention_vecs: &Array2<f32>,
    mentions: &[Mention],
    pooling: Pooling,
) -> Result<Array2<f32>> {
    if mention_vecs.nrows() != mentions.len() {
        return Err(RexError::shape(
            "mention vectors",
            mentions.len(),
            mention_vecs.nrows(),
        ));
    }
    let count = entity_count(mentions)?;
    let mut out = Array2::zeros((count, mention_vecs.ncols()));
    for entity in 0..count {
        let members: Vec<usize> = mentions
            .iter()
            .enumerate()
            .filter(|(_, m)| m.entity_id == entity)
            .map(|(i, _)| i)
            .collect();
        let rows = mention_vecs.select(Axis(0), &members);
        out.row_mut(entity).assign(&pool_rows(rows.view(), pooling));
    }
    Ok(out)
}

/// Mean of the word vectors of every sentence
pub fn sentence_nodes(words: &Array2<f32>, sentence_lengths: &[usize]) -> Result<Array2<f32>> {
    let total: usize = sentence_lengths.iter().sum();
    if total != words.nrows() {
        return Err(RexError::shape("sentence lengths", words.nrows(), total));
    }
    let mut out = Array2::zeros((sentence_lengths.len(), words.ncols()));
    let mut start = 0;
    for (idx, &len) in sentence_lengths.iter().enumerate() {
        if len > 0 {
            let rows = words.slice(s![start..start + len, ..]);
            out.row_mut(idx).assign(&pool_rows(rows, Pooling::Mean));
        }
        start += len;
    }
    Ok(out)
}

/// Records of one document in canonical order: entities, mentions, sentences.
///
/// An entity record takes the semantic type and sentence of its first mention.
pub fn node_records(mentions: &[Mention], sentence_count: usize) -> Result<Vec<NodeRecord>> {
    let count = entity_count(mentions)?;
    let mut records = Vec::with_capacity(count + mentions.len() + sentence_count);

    for entity in 0..count {
        let first = mentions
            .iter()
            .find(|m| m.entity_id == entity)
            .ok_or_else(|| RexError::InvalidDocument(format!("entity {entity} has no mention")))?;
        records.push(NodeRecord {
            node_type: NodeType::Entity,
            semantic_type: first.entity_type,
            sentence_id: first.sentence_id as i64,
        });
    }
    records.extend(mentions.iter().map(|m| NodeRecord {
        node_type: NodeType::Mention,
        semantic_type: m.entity_type,
        sentence_id: m.sentence_id as i64,
    }));
    records.extend((0..sentence_count).map(|s| NodeRecord {
        node_type: NodeType::Sentence,
        semantic_type: NodeRecord::PADDING,
        sentence_id: s as i64,
    }));
    Ok(records)
}

// ============================================================================
// Document Nodes
// ============================================================================

/// Node vectors and records of one document
#[derive(Debug, Clone)]
pub struct DocumentNodes {
    pub entities: Array2<f32>,
    pub mentions: Array2<f32>,
    pub sentences: Array2<f32>,
    pub records: Vec<NodeRecord>,
}

impl DocumentNodes {
    pub fn section(&self) -> Section {
        Section::new(
            self.entities.nrows(),
            self.mentions.nrows(),
            self.sentences.nrows(),
        )
    }

    pub fn dim(&self) -> usize {
        self.entities.ncols()
    }

    /// Matrix of one node type
    pub fn of_type(&self, node_type: NodeType) -> &Array2<f32> {
        match node_type {
            NodeType::Entity => &self.entities,
            NodeType::Mention => &self.mentions,
            NodeType::Sentence => &self.sentences,
        }
    }
}

/// Builds [`DocumentNodes`] from encoded words
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeBuilder {
    pooling: Pooling,
}

impl NodeBuilder {
    pub fn new(pooling: Pooling) -> Self {
        Self { pooling }
    }

    pub fn build(
        &self,
        words: &Array2<f32>,
        mentions: &[Mention],
        sentence_lengths: &[usize],
    ) -> Result<DocumentNodes> {
        let mention_vecs = merge_tokens(words, mentions, self.pooling)?;
        let entities = merge_mentions(&mention_vecs, mentions, self.pooling)?;
        let sentences = sentence_nodes(words, sentence_lengths)?;
        let records = node_records(mentions, sentence_lengths.len())?;
        Ok(DocumentNodes {
            entities,
            mentions: mention_vecs,
            sentences,
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn mention(entity_id: usize, start: usize, end: usize, sentence_id: usize) -> Mention {
        Mention {
            entity_id,
            entity_type: entity_id as i64 + 1,
            start,
            end,
            sentence_id,
        }
    }

    fn words() -> Array2<f32> {
        array![[1.0, 0.0], [3.0, 2.0], [5.0, 4.0], [7.0, 6.0], [9.0, 8.0]]
    }

    #[test]
    fn test_merge_tokens_mean_and_max() {
        let mentions = vec![mention(0, 0, 2, 0), mention(1, 3, 5, 1)];
        let mean = merge_tokens(&words(), &mentions, Pooling::Mean).unwrap();
        assert_eq!(mean, array![[2.0, 1.0], [8.0, 7.0]]);
        let max = merge_tokens(&words(), &mentions, Pooling::Max).unwrap();
        assert_eq!(max, array![[3.0, 2.0], [9.0, 8.0]]);
    }

    #[test]
    fn test_span_out_of_range() {
        let mentions = vec![mention(0, 4, 6, 1)];
        assert!(matches!(
            merge_tokens(&words(), &mentions, Pooling::Mean),
            Err(RexError::SpanOutOfRange { mention: 0, end: 6, len: 5 })
        ));
    }

    #[test]
    fn test_entity_pools_across_sentences() {
        let mentions = vec![mention(0, 0, 1, 0), mention(1, 1, 2, 0), mention(0, 4, 5, 1)];
        let mention_vecs = merge_tokens(&words(), &mentions, Pooling::Mean).unwrap();
        let entities = merge_mentions(&mention_vecs, &mentions, Pooling::Mean).unwrap();
        assert_eq!(entities, array![[5.0, 4.0], [3.0, 2.0]]);
    }

    #[test]
    fn test_sentence_nodes_are_true_means() {
        let sentences = sentence_nodes(&words(), &[3, 2]).unwrap();
        assert_eq!(sentences, array![[3.0, 2.0], [8.0, 7.0]]);
        assert!(sentence_nodes(&words(), &[3, 3]).is_err());
    }

    #[test]
    fn test_records_in_canonical_order() {
        let mentions = vec![mention(1, 3, 4, 1), mention(0, 0, 1, 0), mention(1, 1, 2, 0)];
        let records = node_records(&mentions, 2).unwrap();
        let rows: Vec<[i64; 3]> = records.iter().map(NodeRecord::to_row).collect();
        assert_eq!(
            rows,
            vec![
                [0, 1, 0],
                [0, 2, 1],
                [1, 2, 1],
                [1, 1, 0],
                [1, 2, 0],
                [2, -1, 0],
                [2, -1, 1],
            ]
        );
    }

    #[test]
    fn test_builder_section() {
        let mentions = vec![mention(0, 0, 2, 0), mention(1, 3, 5, 1), mention(0, 2, 3, 0)];
        let nodes = NodeBuilder::new(Pooling::Mean)
            .build(&words(), &mentions, &[3, 2])
            .unwrap();
        assert_eq!(nodes.section(), Section::new(2, 3, 2));
        assert_eq!(nodes.records.len(), 7);
        assert_eq!(nodes.dim(), 2);
    }
}
