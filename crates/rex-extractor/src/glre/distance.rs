//! Directed sentence-distance features

use ndarray::{Array1, Array2};
use rand::RngCore;
use rex_core::{Mention, Result, RexError};
use rex_nn::Embedding;

/// Rows in the distance embedding table
pub const DISTANCE_ROWS: usize = 20;

/// Row of the zero padding vector (distance 0)
pub const DISTANCE_PADDING: usize = 10;

/// Log-2 bucket of an absolute distance: 0, 1, 2-3, 4-7, ..., 256 and beyond
pub fn bucket(distance: u64) -> usize {
    match distance {
        0 => 0,
        d => (64 - d.leading_zeros() as usize).min(9),
    }
}

/// Embedding row for a signed distance: `+-bucket + 10`
pub fn directed_index(distance: i64) -> usize {
    let b = bucket(distance.unsigned_abs());
    if distance < 0 {
        DISTANCE_PADDING - b
    } else {
        DISTANCE_PADDING + b
    }
}

/// Sentence distance `tail - head` of the closest mention pair.
///
/// Ties keep the first pair found in mention order.
pub fn mention_distance(mentions: &[Mention], head: usize, tail: usize) -> Option<i64> {
    let mut best: Option<i64> = None;
    for h in mentions.iter().filter(|m| m.entity_id == head) {
        for t in mentions.iter().filter(|m| m.entity_id == tail) {
            let d = t.sentence_id as i64 - h.sentence_id as i64;
            if best.map_or(true, |b| d.abs() < b.abs()) {
                best = Some(d);
            }
        }
    }
    best
}

/// `(E, E)` matrix of [`mention_distance`] values
pub fn distance_matrix(mentions: &[Mention], entities: usize) -> Array2<i64> {
    Array2::from_shape_fn((entities, entities), |(h, t)| {
        mention_distance(mentions, h, t).unwrap_or(0)
    })
}

/// Embeds the directed distance in both directions of a pair
#[derive(Debug, Clone)]
pub struct DistanceFeature {
    table: Embedding,
}

impl DistanceFeature {
    pub fn new(dim: usize, rng: &mut dyn RngCore) -> Self {
        Self {
            table: Embedding::new(DISTANCE_ROWS, dim, Some(DISTANCE_PADDING), rng),
        }
    }

    pub fn dim(&self) -> usize {
        self.table.dim()
    }

    /// `(head -> tail, tail -> head)` vectors for a signed distance
    pub fn pair(&self, distance: i64) -> Result<(Array1<f32>, Array1<f32>)> {
        let forward = self.table.row(directed_index(distance))?.to_owned();
        let backward = self.table.row(directed_index(-distance))?.to_owned();
        Ok((forward, backward))
    }

    /// Vectors for pair `(head, tail)` of a distance matrix
    pub fn lookup(&self, distances: &Array2<i64>, head: usize, tail: usize) -> Result<(Array1<f32>, Array1<f32>)> {
        let d = distances.get([head, tail]).copied().ok_or_else(|| {
            RexError::shape(
                "distance matrix",
                format!("entity below {}", distances.nrows()),
                format!("({head}, {tail})"),
            )
        })?;
        self.pair(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_bucket_table() {
        let cases = [
            (0, 0),
            (1, 1),
            (2, 2),
            (3, 2),
            (4, 3),
            (7, 3),
            (8, 4),
            (15, 4),
            (16, 5),
            (31, 5),
            (32, 6),
            (63, 6),
            (64, 7),
            (127, 7),
            (128, 8),
            (255, 8),
            (256, 9),
            (10_000, 9),
        ];
        for (d, b) in cases {
            assert_eq!(bucket(d), b, "distance {d}");
        }
    }

    #[test]
    fn test_directed_index_keeps_sign() {
        assert_eq!(directed_index(0), 10);
        assert_eq!(directed_index(3), 12);
        assert_eq!(directed_index(-3), 8);
        assert_eq!(directed_index(-1000), 1);
        assert_eq!(directed_index(1000), 19);
    }

    #[test]
    fn test_zero_distance_embeds_to_padding() {
        let mut rng = StdRng::seed_from_u64(2);
        let feature = DistanceFeature::new(4, &mut rng);
        let (f, b) = feature.pair(0).unwrap();
        assert!(f.iter().all(|&v| v == 0.0));
        assert!(b.iter().all(|&v| v == 0.0));
        let (f, b) = feature.pair(2).unwrap();
        assert_ne!(f, b);
    }

    #[test]
    fn test_closest_mention_pair() {
        let m = |entity_id, sentence_id| Mention {
            entity_id,
            entity_type: 0,
            start: 0,
            end: 1,
            sentence_id,
        };
        let mentions = vec![m(0, 0), m(1, 5), m(0, 4), m(1, 2)];
        assert_eq!(mention_distance(&mentions, 0, 1), Some(1));
        assert_eq!(mention_distance(&mentions, 1, 0), Some(-1));
        assert_eq!(mention_distance(&mentions, 0, 3), None);
        let matrix = distance_matrix(&mentions, 2);
        assert_eq!(matrix[[0, 0]], 0);
        assert_eq!(matrix[[0, 1]], 1);
    }

    proptest! {
        #[test]
        fn prop_bucket_monotone(a in 0u64..100_000, b in 0u64..100_000) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(bucket(lo) <= bucket(hi));
        }
    }
}
