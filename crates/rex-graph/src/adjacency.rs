//! Sparse typed adjacency of a document graph

use ndarray::{Array1, Array2};
use rex_core::{RexError, Result};
use serde::{Deserialize, Serialize};

/// Square coordinate-format sparse matrix
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseMatrix {
    size: usize,
    /// `(row, col, value)` triplets; duplicates add up
    entries: Vec<(usize, usize, f32)>,
}

impl SparseMatrix {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            entries: Vec::new(),
        }
    }

    pub fn from_triplets(size: usize, entries: Vec<(usize, usize, f32)>) -> Result<Self> {
        if let Some(&(r, c, _)) = entries.iter().find(|(r, c, _)| *r >= size || *c >= size) {
            return Err(RexError::shape(
                "adjacency entry",
                format!("indices below {size}"),
                format!("({r}, {c})"),
            ));
        }
        Ok(Self { size, entries })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[(usize, usize, f32)] {
        &self.entries
    }

    /// Add an edge; out-of-range indices are rejected
    pub fn push(&mut self, row: usize, col: usize, value: f32) -> Result<()> {
        if row >= self.size || col >= self.size {
            return Err(RexError::shape(
                "adjacency entry",
                format!("indices below {}", self.size),
                format!("({row}, {col})"),
            ));
        }
        self.entries.push((row, col, value));
        Ok(())
    }

    pub fn row_sums(&self) -> Array1<f32> {
        let mut sums = Array1::zeros(self.size);
        for &(r, _, v) in &self.entries {
            sums[r] += v;
        }
        sums
    }

    pub fn col_sums(&self) -> Array1<f32> {
        let mut sums = Array1::zeros(self.size);
        for &(_, c, v) in &self.entries {
            sums[c] += v;
        }
        sums
    }

    /// `A x` for a dense `(size, d)` matrix
    pub fn matmul(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        if x.nrows() != self.size {
            return Err(RexError::shape("sparse matmul", self.size, x.nrows()));
        }
        let mut out = Array2::zeros((self.size, x.ncols()));
        for &(r, c, v) in &self.entries {
            out.row_mut(r).scaled_add(v, &x.row(c));
        }
        Ok(out)
    }

    pub fn to_dense(&self) -> Array2<f32> {
        let mut dense = Array2::zeros((self.size, self.size));
        for &(r, c, v) in &self.entries {
            dense[[r, c]] += v;
        }
        dense
    }
}

/// One sparse matrix per edge type, all over the same nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationAdjacency {
    matrices: Vec<SparseMatrix>,
}

impl RelationAdjacency {
    pub fn new(matrices: Vec<SparseMatrix>) -> Result<Self> {
        if let Some(first) = matrices.first() {
            if let Some(bad) = matrices.iter().find(|m| m.size != first.size) {
                return Err(RexError::shape("adjacency stack", first.size, bad.size));
            }
        }
        Ok(Self { matrices })
    }

    /// Re-check invariants of deserialized input
    pub fn validate(&self) -> Result<()> {
        let size = self.node_count();
        for m in &self.matrices {
            if m.size != size {
                return Err(RexError::shape("adjacency stack", size, m.size));
            }
            if let Some(&(r, c, _)) = m.entries.iter().find(|(r, c, _)| *r >= size || *c >= size) {
                return Err(RexError::shape(
                    "adjacency entry",
                    format!("indices below {size}"),
                    format!("({r}, {c})"),
                ));
            }
        }
        Ok(())
    }

    /// `relations` empty matrices over `size` nodes
    pub fn empty(relations: usize, size: usize) -> Self {
        Self {
            matrices: vec![SparseMatrix::new(size); relations],
        }
    }

    pub fn relation_count(&self) -> usize {
        self.matrices.len()
    }

    pub fn node_count(&self) -> usize {
        self.matrices.first().map(SparseMatrix::size).unwrap_or(0)
    }

    pub fn relation(&self, r: usize) -> Option<&SparseMatrix> {
        self.matrices.get(r)
    }

    pub fn relation_mut(&mut self, r: usize) -> Option<&mut SparseMatrix> {
        self.matrices.get_mut(r)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SparseMatrix> {
        self.matrices.iter()
    }

    /// In-degree plus out-degree summed over every edge type
    pub fn degree(&self) -> Array1<f32> {
        let mut degree = Array1::zeros(self.node_count());
        for m in &self.matrices {
            degree += &m.row_sums();
            degree += &m.col_sums();
        }
        degree
    }

    /// Nodes without any edge in any edge type
    pub fn isolated(&self) -> Vec<bool> {
        self.degree().iter().map(|&d| d == 0.0).collect()
    }
}
