//! Relational graph convolution
//!
//! Per layer `l`:
//!
//! ```text
//! h' = ReLU((sum_r A_r (W_r h) + W_0 h) / (1 + sum_r (in_r + out_r)))
//! ```
//!
//! Dropout is applied to the layer-0 input and between layers, never after
//! the last layer. With zero layers the input passes through unchanged.

use crate::adjacency::RelationAdjacency;
use ndarray::{Array2, Axis};
use rand::RngCore;
use rex_core::{RexError, Result};
use rex_nn::ops::relu;
use rex_nn::{Dropout, Linear, Mode};
use tracing::trace;

#[derive(Debug, Clone)]
struct RgcnLayer {
    /// One transform per edge type
    relation: Vec<Linear>,
    self_loop: Linear,
}

/// Output of [`Rgcn::forward`]
#[derive(Debug, Clone)]
pub struct RgcnOutput {
    pub nodes: Array2<f32>,
    /// Nodes with zero degree in every edge type
    pub isolated: Vec<bool>,
}

/// Stack of relational graph convolution layers
#[derive(Debug, Clone)]
pub struct Rgcn {
    in_dim: usize,
    mem_dim: usize,
    relation_count: usize,
    layers: Vec<RgcnLayer>,
    in_drop: Dropout,
    out_drop: Dropout,
}

impl Rgcn {
    pub fn new(
        in_dim: usize,
        mem_dim: usize,
        num_layers: usize,
        relation_count: usize,
        in_drop: f32,
        out_drop: f32,
        rng: &mut dyn RngCore,
    ) -> Self {
        let layers = (0..num_layers)
            .map(|layer| {
                let input = if layer == 0 { in_dim } else { mem_dim };
                RgcnLayer {
                    relation: (0..relation_count)
                        .map(|_| Linear::new(input, mem_dim, true, rng))
                        .collect(),
                    self_loop: Linear::new(input, mem_dim, true, rng),
                }
            })
            .collect();
        Self {
            in_dim,
            mem_dim,
            relation_count,
            layers,
            in_drop: Dropout::new(in_drop),
            out_drop: Dropout::new(out_drop),
        }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Width of the node vectors after the graph
    pub fn output_dim(&self) -> usize {
        if self.layers.is_empty() {
            self.in_dim
        } else {
            self.mem_dim
        }
    }

    /// Run over the nodes of one document
    pub fn forward(
        &self,
        nodes: &Array2<f32>,
        adjacency: &RelationAdjacency,
        mode: Mode,
        rng: &mut dyn RngCore,
    ) -> Result<RgcnOutput> {
        if nodes.ncols() != self.in_dim {
            return Err(RexError::shape("rgcn input", self.in_dim, nodes.ncols()));
        }
        if adjacency.node_count() != nodes.nrows() {
            return Err(RexError::shape(
                "rgcn adjacency",
                nodes.nrows(),
                adjacency.node_count(),
            ));
        }
        let isolated = adjacency.isolated();
        if self.layers.is_empty() {
            return Ok(RgcnOutput {
                nodes: nodes.clone(),
                isolated,
            });
        }
        if adjacency.relation_count() != self.relation_count {
            return Err(RexError::shape(
                "rgcn edge types",
                self.relation_count,
                adjacency.relation_count(),
            ));
        }

        let denom = (adjacency.degree() + 1.0).insert_axis(Axis(1));
        let mut h = self.in_drop.apply(nodes.clone(), mode, rng);
        let last = self.layers.len() - 1;
        for (l, layer) in self.layers.iter().enumerate() {
            let mut acc = layer.self_loop.forward(&h)?;
            for (w_r, a_r) in layer.relation.iter().zip(adjacency.iter()) {
                acc += &a_r.matmul(&w_r.forward(&h)?)?;
            }
            let out = relu(acc / &denom);
            h = if l < last {
                self.out_drop.apply(out, mode, rng)
            } else {
                out
            };
            trace!(layer = l, nodes = h.nrows(), "rgcn layer done");
        }
        Ok(RgcnOutput { nodes: h, isolated })
    }
}
