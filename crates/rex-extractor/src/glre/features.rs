//! Per-pair feature sources concatenated before the stage pipeline

use super::distance::DistanceFeature;
use ndarray::{Array2, ArrayView1};
use rex_core::{GlreConfig, Result, RexError};
use serde::{Deserialize, Serialize};

/// One block of the `[head side | tail side]` pair vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureSource {
    /// Graph-refined entity vectors
    Global,
    /// Mention attention outputs
    Local,
    /// Directed sentence-distance embedding
    Distance,
}

impl FeatureSource {
    /// Enabled sources in concatenation order
    pub fn resolve(config: &GlreConfig) -> Vec<Self> {
        [
            (config.global_rep, Self::Global),
            (config.local_rep, Self::Local),
            (config.finaldist, Self::Distance),
        ]
        .into_iter()
        .filter_map(|(on, source)| on.then_some(source))
        .collect()
    }
}

impl std::fmt::Display for FeatureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Local => write!(f, "local"),
            Self::Distance => write!(f, "distance"),
        }
    }
}

/// Everything the sources read for the pairs of one document
pub struct DocumentFeatures<'a> {
    /// Graph output, entities first
    pub graph: &'a Array2<f32>,
    /// Local `(head_side, tail_side)`, one row per pair
    pub local: Option<&'a (Array2<f32>, Array2<f32>)>,
    /// Entity sentence distances and their embedding
    pub distance: Option<(&'a Array2<i64>, &'a DistanceFeature)>,
}

impl DocumentFeatures<'_> {
    /// `(P, 2 * side_width)` rows for `pairs`, sources in the given order
    pub fn pair_rows(&self, sources: &[FeatureSource], pairs: &[(usize, usize)]) -> Result<Array2<f32>> {
        let mut data = Vec::new();
        let mut width = 0;
        for (p, &(h, t)) in pairs.iter().enumerate() {
            let mut head_side: Vec<f32> = Vec::new();
            let mut tail_side: Vec<f32> = Vec::new();
            for source in sources {
                match source {
                    FeatureSource::Global => {
                        head_side.extend(graph_row(self.graph, h)?.iter());
                        tail_side.extend(graph_row(self.graph, t)?.iter());
                    }
                    FeatureSource::Local => {
                        let (heads, tails) = self.local.ok_or_else(|| missing(*source))?;
                        if heads.nrows() != pairs.len() || tails.nrows() != pairs.len() {
                            return Err(RexError::shape("local pair rows", pairs.len(), heads.nrows()));
                        }
                        head_side.extend(heads.row(p).iter());
                        tail_side.extend(tails.row(p).iter());
                    }
                    FeatureSource::Distance => {
                        let (matrix, table) = self.distance.ok_or_else(|| missing(*source))?;
                        let (forward, backward) = table.lookup(matrix, h, t)?;
                        head_side.extend(forward.iter());
                        tail_side.extend(backward.iter());
                    }
                }
            }
            head_side.extend(tail_side);
            width = head_side.len();
            data.extend(head_side);
        }
        Array2::from_shape_vec((pairs.len(), width), data)
            .map_err(|e| RexError::shape("pair features", "equal widths", e))
    }
}

fn graph_row(graph: &Array2<f32>, node: usize) -> Result<ArrayView1<'_, f32>> {
    if node >= graph.nrows() {
        return Err(RexError::shape(
            "graph node",
            format!("below {}", graph.nrows()),
            node,
        ));
    }
    Ok(graph.row(node))
}

fn missing(source: FeatureSource) -> RexError {
    RexError::InvalidDocument(format!("{source} features were requested but not computed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_resolve_order() {
        let config = GlreConfig {
            local_rep: true,
            global_rep: true,
            finaldist: false,
            ..GlreConfig::default()
        };
        assert_eq!(
            FeatureSource::resolve(&config),
            vec![FeatureSource::Global, FeatureSource::Local]
        );
    }

    #[test]
    fn test_pair_rows_layout() {
        let graph = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let local = (array![[10.0], [20.0]], array![[-10.0], [-20.0]]);
        let mut rng = StdRng::seed_from_u64(0);
        let table = DistanceFeature::new(1, &mut rng);
        let distances = Array2::zeros((3, 3));
        let features = DocumentFeatures {
            graph: &graph,
            local: Some(&local),
            distance: Some((&distances, &table)),
        };
        let sources = [FeatureSource::Global, FeatureSource::Local, FeatureSource::Distance];
        let rows = features.pair_rows(&sources, &[(0, 2), (1, 0)]).unwrap();
        assert_eq!(
            rows,
            array![
                [1.0, 2.0, 10.0, 0.0, 5.0, 6.0, -10.0, 0.0],
                [3.0, 4.0, 20.0, 0.0, 1.0, 2.0, -20.0, 0.0]
            ]
        );
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let graph = array![[1.0], [2.0]];
        let features = DocumentFeatures {
            graph: &graph,
            local: None,
            distance: None,
        };
        assert!(features.pair_rows(&[FeatureSource::Local], &[(0, 1)]).is_err());
        let empty = features.pair_rows(&[FeatureSource::Global], &[]).unwrap();
        assert_eq!(empty.nrows(), 0);
    }
}
