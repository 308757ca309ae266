//! Mention-level attention pair representations

use ndarray::{Array2, Axis};
use rand::RngCore;
use rex_core::{Result, RexError};
use rex_nn::{Mode, MultiHeadAttention};

/// Per-document inputs of [`LocalRepLayer::forward`]
pub struct LocalInputs<'a> {
    /// `(E, query_dim)` entity vectors used as queries
    pub entities: &'a Array2<f32>,
    /// `(M, dim)` mention vectors (attention values)
    pub mentions: &'a Array2<f32>,
    /// `(M, dim)` sentence vector of each mention (attention keys)
    pub contexts: &'a Array2<f32>,
    /// Entity id of each mention
    pub mention_entities: &'a [usize],
}

/// Two independent attentions over mentions, one per pair side.
///
/// For pair `(h, t)` the head side asks with entity `t` and never sees the
/// mentions of `h`; the tail side asks with entity `h` and never sees the
/// mentions of `t`.
#[derive(Debug, Clone)]
pub struct LocalRepLayer {
    head_attention: MultiHeadAttention,
    tail_attention: MultiHeadAttention,
}

impl LocalRepLayer {
    pub fn new(
        query_dim: usize,
        node_dim: usize,
        heads: usize,
        dropout: f32,
        rng: &mut dyn RngCore,
    ) -> Result<Self> {
        Ok(Self {
            head_attention: MultiHeadAttention::new(query_dim, node_dim, node_dim, node_dim, heads, dropout, rng)?,
            tail_attention: MultiHeadAttention::new(query_dim, node_dim, node_dim, node_dim, heads, dropout, rng)?,
        })
    }

    pub fn output_dim(&self) -> usize {
        self.head_attention.d_model()
    }

    /// `(head_side, tail_side)`, each `(P, output_dim)` for the given `(h, t)` pairs
    pub fn forward(
        &self,
        inputs: &LocalInputs<'_>,
        pairs: &[(usize, usize)],
        mode: Mode,
        rng: &mut dyn RngCore,
    ) -> Result<(Array2<f32>, Array2<f32>)> {
        let entity_count = inputs.entities.nrows();
        if inputs.mention_entities.len() != inputs.mentions.nrows() {
            return Err(RexError::shape(
                "mention entity ids",
                inputs.mentions.nrows(),
                inputs.mention_entities.len(),
            ));
        }
        if let Some(&(h, t)) = pairs.iter().find(|&&(h, t)| h >= entity_count || t >= entity_count) {
            return Err(RexError::shape(
                "local pair",
                format!("entities below {entity_count}"),
                format!("({h}, {t})"),
            ));
        }

        let heads: Vec<usize> = pairs.iter().map(|&(h, _)| h).collect();
        let tails: Vec<usize> = pairs.iter().map(|&(_, t)| t).collect();
        let head_queries = inputs.entities.select(Axis(0), &heads);
        let tail_queries = inputs.entities.select(Axis(0), &tails);

        let head_mask = foreign_mask(&heads, inputs.mention_entities);
        let tail_mask = foreign_mask(&tails, inputs.mention_entities);

        let head_side = self.head_attention.forward(
            &tail_queries,
            inputs.contexts,
            inputs.mentions,
            Some(&head_mask),
            mode,
            rng,
        )?;
        let tail_side = self.tail_attention.forward(
            &head_queries,
            inputs.contexts,
            inputs.mentions,
            Some(&tail_mask),
            mode,
            rng,
        )?;
        Ok((head_side, tail_side))
    }
}

/// `(P, M)` mask, true where mention `m` does not belong to `excluded[p]`
fn foreign_mask(excluded: &[usize], mention_entities: &[usize]) -> Array2<bool> {
    Array2::from_shape_fn((excluded.len(), mention_entities.len()), |(p, m)| {
        mention_entities[m] != excluded[p]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_foreign_mask() {
        let mask = foreign_mask(&[0, 1], &[0, 1, 0]);
        assert_eq!(mask, array![[false, true, false], [true, false, true]]);
    }

    #[test]
    fn test_head_side_ignores_head_mentions() {
        let mut rng = StdRng::seed_from_u64(9);
        let layer = LocalRepLayer::new(3, 4, 2, 0.0, &mut rng).unwrap();
        let entities = array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let contexts = array![[1.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 1.0], [1.0, 0.0, 1.0, 0.0]];
        let original = array![[1.0, 2.0, 3.0, 4.0], [4.0, 3.0, 2.0, 1.0], [0.5, 0.5, 0.5, 0.5]];
        let mut changed = original.clone();
        // entity 0 owns mention 0
        changed.row_mut(0).assign(&array![-7.0, 9.0, -3.0, 20.0]);

        let run = |mentions: &Array2<f32>, rng: &mut StdRng| {
            let inputs = LocalInputs {
                entities: &entities,
                mentions,
                contexts: &contexts,
                mention_entities: &[0, 1, 2],
            };
            layer.forward(&inputs, &[(0, 1)], Mode::Eval, rng).unwrap()
        };
        let (head_before, tail_before) = run(&original, &mut rng);
        let (head_after, tail_after) = run(&changed, &mut rng);
        assert_eq!(head_before.dim(), (1, 4));

        assert!(head_before
            .iter()
            .zip(head_after.iter())
            .all(|(a, b)| (a - b).abs() < 1e-6));
        // the tail side may look at the head's mentions
        assert!(tail_before
            .iter()
            .zip(tail_after.iter())
            .any(|(a, b)| (a - b).abs() > 1e-6));
    }

    #[test]
    fn test_tail_side_ignores_tail_mentions() {
        let mut rng = StdRng::seed_from_u64(4);
        let layer = LocalRepLayer::new(2, 2, 1, 0.0, &mut rng).unwrap();
        let entities = array![[1.0, 0.0], [0.0, 1.0]];
        let contexts = array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let original = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let mut changed = original.clone();
        changed.row_mut(1).assign(&array![-10.0, 10.0]);
        changed.row_mut(2).assign(&array![8.0, -8.0]);

        let mut tails = vec![];
        for mentions in [&original, &changed] {
            let inputs = LocalInputs {
                entities: &entities,
                mentions,
                contexts: &contexts,
                mention_entities: &[0, 1, 1],
            };
            let (_, t) = layer.forward(&inputs, &[(0, 1)], Mode::Eval, &mut rng).unwrap();
            tails.push(t);
        }
        assert!(tails[0].iter().zip(tails[1].iter()).all(|(a, b)| (a - b).abs() < 1e-6));
    }

    #[test]
    fn test_fully_masked_side_gives_zero_row() {
        let mut rng = StdRng::seed_from_u64(9);
        let layer = LocalRepLayer::new(2, 2, 1, 0.0, &mut rng).unwrap();
        let entities = array![[1.0, 0.0], [0.0, 1.0]];
        let mentions = array![[1.0, 1.0]];
        let inputs = LocalInputs {
            entities: &entities,
            mentions: &mentions,
            contexts: &mentions,
            mention_entities: &[0],
        };
        // every mention belongs to the head, so the head side sees nothing
        let (h, t) = layer.forward(&inputs, &[(0, 1)], Mode::Eval, &mut rng).unwrap();
        assert!(h.iter().all(|&v| v == 0.0));
        assert!(t.iter().any(|&v| v != 0.0));
        assert!(layer.forward(&inputs, &[(0, 2)], Mode::Eval, &mut rng).is_err());
    }
}
