//! Candidate entity-pair selection over padded node records

use ndarray::{Array3, Axis};
use rex_core::{DatasetKind, GlreConfig, NodeType, Result, Vocabulary};

/// Which ordered node pairs are classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionRule {
    /// Both nodes are entities and differ
    Generic,
    /// Generic, plus fixed head and tail semantic types
    Typed { head_type: i64, tail_type: i64 },
}

/// Selected pairs in row-major `(batch, head, tail)` order plus the full mask
#[derive(Debug, Clone, PartialEq)]
pub struct PairSelection {
    pub pairs: Vec<(usize, usize, usize)>,
    /// `(B, N, N)`, true where a pair is selected
    pub mask: Array3<bool>,
}

impl PairSelection {
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Batch index of every selected pair
    pub fn documents(&self) -> Vec<usize> {
        self.pairs.iter().map(|&(b, _, _)| b).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairSelector {
    rule: SelectionRule,
}

impl PairSelector {
    pub fn new(rule: SelectionRule) -> Self {
        Self { rule }
    }

    /// Resolve the dataset rule; typed rules look their type ids up in `types`
    pub fn from_config(config: &GlreConfig, types: &Vocabulary) -> Result<Self> {
        let rule = match config.dataset {
            DatasetKind::DocRed => SelectionRule::Generic,
            DatasetKind::Cdr => SelectionRule::Typed {
                head_type: types.require(&config.cdr_head_type)? as i64,
                tail_type: types.require(&config.cdr_tail_type)? as i64,
            },
        };
        Ok(Self { rule })
    }

    pub fn rule(&self) -> SelectionRule {
        self.rule
    }

    /// Apply the rule to `(B, N, 3)` records (node type | semantic type | sentence)
    pub fn select(&self, records: &Array3<i64>) -> PairSelection {
        let (batch, nodes, _) = records.dim();
        let entity = NodeType::Entity.index() as i64;
        let mut mask = Array3::from_elem((batch, nodes, nodes), false);
        let mut pairs = Vec::new();

        for (b, doc) in records.axis_iter(Axis(0)).enumerate() {
            for h in 0..nodes {
                for t in 0..nodes {
                    let keep = h != t
                        && doc[[h, 0]] == entity
                        && doc[[t, 0]] == entity
                        && match self.rule {
                            SelectionRule::Generic => true,
                            SelectionRule::Typed {
                                head_type,
                                tail_type,
                            } => doc[[h, 1]] == head_type && doc[[t, 1]] == tail_type,
                        };
                    if keep {
                        mask[[b, h, t]] = true;
                        pairs.push((b, h, t));
                    }
                }
            }
        }
        PairSelection { pairs, mask }
    }
}
