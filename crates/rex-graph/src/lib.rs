//! REX Graph - Document graph construction and message passing
//!
//! Builds entity, mention and sentence nodes from encoded words, batches
//! them through a type-major arena, and refines them with a relational
//! graph convolution over typed sparse adjacency matrices.

pub mod adjacency;
pub mod batch;
pub mod nodes;
pub mod rgcn;

pub use adjacency::{RelationAdjacency, SparseMatrix};
pub use batch::{NodeArena, NodeBatch, OffsetTable};
pub use nodes::{merge_mentions, merge_tokens, node_records, sentence_nodes, DocumentNodes, NodeBuilder};
pub use rgcn::{Rgcn, RgcnOutput};

/// Number of edge types in a document graph
pub const EDGE_TYPES: usize = 5;
