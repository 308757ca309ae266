//! Pair selection, tag-cube decoding and distance bucketing through the public API

use ndarray::Array3;
use proptest::prelude::*;
use rex_core::{NodeRecord, NodeType, OneRelRelations, RelationTriple};
use rex_extractor::glre::{bucket, directed_index, PairSelector, SelectionRule};
use rex_extractor::onerel::{decode_entity, Tag, TableDecoder, TagCube};
use std::sync::Arc;

const TEXT: &str = "john smith works for acme corp";

/// `[CLS] john smith works for acme corp [SEP]`
fn offsets() -> Vec<(usize, usize)> {
    vec![(0, 0), (0, 4), (5, 10), (11, 16), (17, 20), (21, 25), (26, 30), (0, 0)]
}

fn decoder() -> TableDecoder {
    TableDecoder::new(Arc::new(OneRelRelations::from_names(["works_for"])))
}

#[test]
fn test_generic_filter_selects_ordered_entity_pairs() {
    let mut records = vec![];
    for e in 0..4 {
        records.push(NodeRecord {
            node_type: NodeType::Entity,
            semantic_type: e % 2,
            sentence_id: 0,
        });
    }
    records.push(NodeRecord {
        node_type: NodeType::Mention,
        semantic_type: 1,
        sentence_id: 0,
    });
    records.push(NodeRecord {
        node_type: NodeType::Sentence,
        semantic_type: NodeRecord::PADDING,
        sentence_id: 0,
    });
    let rows: Vec<i64> = records.iter().flat_map(NodeRecord::to_row).collect();
    let records = Array3::from_shape_vec((1, 6, 3), rows).unwrap();

    let selection = PairSelector::new(SelectionRule::Generic).select(&records);
    assert_eq!(selection.len(), 12);
    assert!(selection.pairs.iter().all(|&(_, h, t)| h != t && h < 4 && t < 4));
    assert_eq!(selection.mask.iter().filter(|m| **m).count(), 12);
}

#[test]
fn test_full_chain_decodes_one_triple() {
    // subject "john smith" (1..=2), object "acme corp" (5..=6)
    let mut cube = TagCube::new(1, 8);
    cube.set(0, 1, 5, Tag::HbTb).unwrap();
    cube.set(0, 1, 6, Tag::HbTe).unwrap();
    cube.set(0, 2, 6, Tag::HeTe).unwrap();

    let triples = decoder().decode(&cube, TEXT, &offsets());
    assert_eq!(triples, vec![RelationTriple::new("john smith", "works_for", "acme corp")]);
    // character offsets of the two spans
    assert_eq!(decode_entity(TEXT, &offsets(), 1, 2), &TEXT[0..10]);
    assert_eq!(decode_entity(TEXT, &offsets(), 5, 6), &TEXT[21..30]);
}

#[test]
fn test_isolated_hb_tb_decodes_single_tokens() {
    let mut cube = TagCube::new(1, 8);
    cube.set(0, 2, 5, Tag::HbTb).unwrap();
    let triples = decoder().decode(&cube, TEXT, &offsets());
    assert_eq!(triples, vec![RelationTriple::new("smith", "works_for", "acme")]);
}

#[test]
fn test_zero_distance_maps_to_zero_bucket() {
    assert_eq!(bucket(0), 0);
    assert_eq!(directed_index(0), 10);
}

proptest! {
    #[test]
    fn prop_bucket_non_decreasing(d in 0u64..1_000_000) {
        prop_assert!(bucket(d) <= bucket(d + 1));
        prop_assert!(bucket(d) <= 9);
    }

    #[test]
    fn prop_directed_index_mirrors_sign(d in 1i64..10_000) {
        prop_assert_eq!(directed_index(d) - 10, 10 - directed_index(-d));
    }
}
