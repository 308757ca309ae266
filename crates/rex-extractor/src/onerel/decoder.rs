//! Tag-cube decoding into surface triples
//!
//! Non-`A` cells of each relation plane are visited in row-major order. An
//! `HB-TB` cell opens a candidate; the next visited cell decides whether the
//! object is multi-token (`HB-TE` on the same head row) or a single token.
//! The subject end is then searched down the object-end column for `HE-TE`
//! cells, and every hit yields a triple. Without a hit the subject is the
//! single head token.

use super::tags::{LossMask, Tag, TagCube};
use rex_core::{OneRelRelations, RelationTriple, Result};
use std::sync::Arc;
use tracing::trace;

/// Surface text covered by tokens `start..=end`.
///
/// `offsets[k]` is the character span of token `k`; an empty span (special
/// tokens, or an index past the table) maps a start to character 0 and an
/// end to the last character of `text`.
pub fn decode_entity(text: &str, offsets: &[(usize, usize)], start: usize, end: usize) -> String {
    let span = |k: usize| offsets.get(k).copied().filter(|&(s, e)| e > s);
    let from = span(start).map(|(s, _)| s).unwrap_or(0);
    let to = match span(end) {
        Some((_, e)) => e,
        None => text.chars().count(),
    };
    crate::tokenizer::char_slice(text, from, to)
}

/// Decodes predicted tag cubes with a fixed relation vocabulary
#[derive(Debug, Clone)]
pub struct TableDecoder {
    relations: Arc<OneRelRelations>,
}

impl TableDecoder {
    pub fn new(relations: Arc<OneRelRelations>) -> Self {
        Self { relations }
    }

    /// Apply `mask` to the cube, then decode
    pub fn decode_masked(
        &self,
        cube: TagCube,
        mask: &LossMask,
        text: &str,
        offsets: &[(usize, usize)],
    ) -> Result<Vec<RelationTriple>> {
        let cube = cube.masked(mask)?;
        Ok(self.decode(&cube, text, offsets))
    }

    /// Triples in discovery order; duplicates are kept
    pub fn decode(&self, cube: &TagCube, text: &str, offsets: &[(usize, usize)]) -> Vec<RelationTriple> {
        let len = cube.len();
        let mut triples = Vec::new();

        for r in 0..cube.relations() {
            let plane = cube.relation(r);
            let cells: Vec<(usize, usize)> = plane
                .indexed_iter()
                .filter(|(_, &tag)| tag != 0)
                .map(|(pos, _)| pos)
                .collect();
            if cells.is_empty() {
                continue;
            }
            let relation = self
                .relations
                .relation(r)
                .map(str::to_string)
                .unwrap_or_else(|| r.to_string());

            let mut emit = |sub_start: usize, sub_end: usize, obj_start: usize, obj_end: usize| -> bool {
                let subject = decode_entity(text, offsets, sub_start, sub_end);
                let object = decode_entity(text, offsets, obj_start, obj_end);
                if subject.is_empty() || object.is_empty() {
                    return false;
                }
                trace!(%relation, %subject, %object, "decoded triple");
                triples.push(RelationTriple::new(subject, relation.clone(), object));
                true
            };

            for (i, &(hs, ts)) in cells.iter().enumerate() {
                if cube.get(r, hs, ts) != Tag::HbTb {
                    continue;
                }

                let multi_token_end = cells
                    .get(i + 1)
                    .map(|&(_, te)| te)
                    .filter(|&te| cube.get(r, hs, te) == Tag::HbTe);
                let te = multi_token_end.unwrap_or(ts);

                let mut found = false;
                for he in hs..len {
                    if cube.get(r, he, te) == Tag::HeTe && emit(hs, he, ts, te) {
                        found = true;
                    }
                }
                if !found {
                    emit(hs, hs, ts, te);
                }
            }
        }
        triples
    }
}
