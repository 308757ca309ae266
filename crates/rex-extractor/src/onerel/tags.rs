//! Table-filling tags and the per-relation tag cube

use ndarray::{Array2, Array3, Array4, ArrayView2, Axis};
use rex_core::{RexError, Result};
use serde::{Deserialize, Serialize};

/// Number of tag classes scored per cell
pub const TAG_SIZE: usize = 4;

/// Tag of one `(relation, head_token, tail_token)` cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Tag {
    /// No relation at this cell
    #[default]
    #[serde(rename = "A")]
    None,
    /// Subject begin, object begin
    #[serde(rename = "HB-TB")]
    HbTb,
    /// Subject begin, object end
    #[serde(rename = "HB-TE")]
    HbTe,
    /// Subject end, object end
    #[serde(rename = "HE-TE")]
    HeTe,
}

impl Tag {
    /// Out-of-range indices map to [`Tag::None`]
    pub fn from_index(idx: usize) -> Self {
        match idx {
            1 => Self::HbTb,
            2 => Self::HbTe,
            3 => Self::HeTe,
            _ => Self::None,
        }
    }

    pub fn to_index(self) -> usize {
        match self {
            Self::None => 0,
            Self::HbTb => 1,
            Self::HbTe => 2,
            Self::HeTe => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "A",
            Self::HbTb => "HB-TB",
            Self::HbTe => "HB-TE",
            Self::HeTe => "HE-TE",
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag ids over `(relation, head_token, tail_token)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCube {
    cells: Array3<u8>,
}

impl TagCube {
    /// All-`A` cube
    pub fn new(relations: usize, len: usize) -> Self {
        Self {
            cells: Array3::zeros((relations, len, len)),
        }
    }

    /// Wrap raw tag ids; every value must be a valid tag
    pub fn from_ids(cells: Array3<u8>) -> Result<Self> {
        let (_, rows, cols) = cells.dim();
        if rows != cols {
            return Err(RexError::shape("tag cube", format!("{rows}x{rows}"), format!("{rows}x{cols}")));
        }
        if let Some(bad) = cells.iter().find(|&&v| v as usize >= TAG_SIZE) {
            return Err(RexError::shape("tag id", format!("below {TAG_SIZE}"), bad));
        }
        Ok(Self { cells })
    }

    /// Argmax over the tag axis of `(L, L, R, 4)` scores
    pub fn from_scores(scores: &Array4<f32>) -> Result<Self> {
        let (rows, cols, relations, tags) = scores.dim();
        if tags != TAG_SIZE || rows != cols {
            return Err(RexError::shape(
                "tag scores",
                format!("(L, L, R, {TAG_SIZE})"),
                format!("({rows}, {cols}, {relations}, {tags})"),
            ));
        }
        let mut cells = Array3::zeros((relations, rows, cols));
        for ((i, j, r, t), &score) in scores.indexed_iter() {
            if t == 0 {
                continue;
            }
            let best = scores[[i, j, r, cells[[r, i, j]] as usize]];
            if score > best {
                cells[[r, i, j]] = t as u8;
            }
        }
        Ok(Self { cells })
    }

    pub fn relations(&self) -> usize {
        self.cells.len_of(Axis(0))
    }

    /// Sequence length `L`
    pub fn len(&self) -> usize {
        self.cells.len_of(Axis(1))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, relation: usize, head: usize, tail: usize) -> Tag {
        self.cells
            .get([relation, head, tail])
            .map(|&v| Tag::from_index(v as usize))
            .unwrap_or_default()
    }

    pub fn set(&mut self, relation: usize, head: usize, tail: usize, tag: Tag) -> Result<()> {
        let len = self.len();
        let relations = self.cells.len_of(Axis(0));
        let cell = self.cells.get_mut([relation, head, tail]).ok_or_else(|| {
            RexError::shape(
                "tag cell",
                format!("relation below {relations} and tokens below {len}"),
                format!("({relation}, {head}, {tail})"),
            )
        })?;
        *cell = tag.to_index() as u8;
        Ok(())
    }

    /// Tag ids of one relation as an `(L, L)` view
    pub fn relation(&self, relation: usize) -> ArrayView2<'_, u8> {
        self.cells.index_axis(Axis(0), relation)
    }

    /// Zero every cell where `mask` is zero
    pub fn masked(mut self, mask: &LossMask) -> Result<Self> {
        if mask.len() != self.len() {
            return Err(RexError::shape("loss mask", self.len(), mask.len()));
        }
        for mut plane in self.cells.axis_iter_mut(Axis(0)) {
            plane.zip_mut_with(&mask.cells, |cell, &keep| {
                if !keep {
                    *cell = 0;
                }
            });
        }
        Ok(self)
    }

    /// Number of non-`A` cells
    pub fn nnz(&self) -> usize {
        self.cells.iter().filter(|&&v| v != 0).count()
    }

    pub fn ids(&self) -> &Array3<u8> {
        &self.cells
    }
}

/// Which `(head, tail)` cells count towards the loss and decoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossMask {
    cells: Array2<bool>,
}

impl LossMask {
    /// Every cell counts (training samples)
    pub fn ones(len: usize) -> Self {
        Self {
            cells: Array2::from_elem((len, len), true),
        }
    }

    /// Attention mask broadcast over rows: cell `(i, j)` counts when token `j` is real
    pub fn from_attention(attention_mask: &[bool]) -> Self {
        let len = attention_mask.len();
        Self {
            cells: Array2::from_shape_fn((len, len), |(_, j)| attention_mask[j]),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, head: usize, tail: usize) -> bool {
        self.cells.get([head, tail]).copied().unwrap_or(false)
    }

    /// Number of counted cells
    pub fn count(&self) -> usize {
        self.cells.iter().filter(|&&m| m).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_index_mapping() {
        assert_eq!(Tag::from_index(0), Tag::None);
        assert_eq!(Tag::from_index(1), Tag::HbTb);
        assert_eq!(Tag::from_index(2), Tag::HbTe);
        assert_eq!(Tag::from_index(3), Tag::HeTe);
        assert_eq!(Tag::from_index(9), Tag::None);
        assert_eq!(Tag::HeTe.to_index(), 3);
        assert_eq!(Tag::HbTe.to_string(), "HB-TE");
    }

    #[test]
    fn test_from_scores_takes_argmax() {
        let mut scores = Array4::<f32>::zeros((2, 2, 1, TAG_SIZE));
        scores[[0, 1, 0, 2]] = 3.0;
        scores[[1, 1, 0, 3]] = 0.5;
        scores[[1, 1, 0, 1]] = 0.7;
        let cube = TagCube::from_scores(&scores).unwrap();
        assert_eq!(cube.get(0, 0, 1), Tag::HbTe);
        assert_eq!(cube.get(0, 1, 1), Tag::HbTb);
        assert_eq!(cube.get(0, 0, 0), Tag::None);
    }

    #[test]
    fn test_masked_clears_padding_columns() {
        let mut cube = TagCube::new(1, 3);
        cube.set(0, 0, 2, Tag::HbTb).unwrap();
        cube.set(0, 2, 1, Tag::HeTe).unwrap();
        let mask = LossMask::from_attention(&[true, true, false]);
        let cube = cube.masked(&mask).unwrap();
        assert_eq!(cube.get(0, 0, 2), Tag::None);
        assert_eq!(cube.get(0, 2, 1), Tag::HeTe);
        assert_eq!(cube.nnz(), 1);
    }

    #[test]
    fn test_invalid_ids_rejected() {
        assert!(TagCube::from_ids(Array3::from_elem((1, 2, 2), 4)).is_err());
        assert!(TagCube::from_ids(Array3::zeros((1, 2, 3))).is_err());
        assert!(TagCube::new(1, 2).set(1, 0, 0, Tag::HbTb).is_err());
    }

    #[test]
    fn test_set_out_of_range_reports_bounds() {
        let mut cube = TagCube::new(2, 3);
        cube.set(1, 2, 0, Tag::HbTe).unwrap();
        assert_eq!(cube.get(1, 2, 0), Tag::HbTe);

        let err = cube.set(0, 3, 0, Tag::HbTb).unwrap_err().to_string();
        assert!(err.contains("relation below 2 and tokens below 3"), "{err}");
        assert!(err.contains("(0, 3, 0)"), "{err}");
    }
}
