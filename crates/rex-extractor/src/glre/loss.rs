//! Multi-label loss and per-class prediction counts

use super::batch::PairLabel;
use ndarray::Array2;
use rex_core::{Result, RexError};
use rex_nn::ops::{argmax_rows, bce_with_logits};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Gold targets of the selected pairs
#[derive(Debug, Clone, PartialEq)]
pub struct PairTargets {
    /// `(P, rel_size)` multi-hot rows; all zero for unlabelled pairs
    pub multi_hot: Array2<f32>,
    /// Single gold class per pair, used for counting
    pub truth: Vec<usize>,
}

impl PairTargets {
    /// Build targets for `pairs` given as `(document, head, tail)`.
    ///
    /// Documents with `labels == None` stay unlabelled. In a labelled document
    /// every selected pair without a gold label is an `na_index` pair.
    pub fn build(
        pairs: &[(usize, usize, usize)],
        labels: &[Option<&[PairLabel]>],
        rel_size: usize,
        na_index: usize,
    ) -> Result<Self> {
        let lookup: Vec<Option<HashMap<(usize, usize), &[usize]>>> = labels
            .iter()
            .map(|doc| {
                doc.map(|ls| {
                    ls.iter()
                        .map(|l| ((l.head, l.tail), l.relations.as_slice()))
                        .collect()
                })
            })
            .collect();

        let mut multi_hot = Array2::zeros((pairs.len(), rel_size));
        let mut truth = vec![na_index; pairs.len()];
        for (p, &(doc, h, t)) in pairs.iter().enumerate() {
            let Some(doc_labels) = lookup.get(doc).ok_or_else(|| {
                RexError::shape("pair document", format!("below {}", lookup.len()), doc)
            })?
            else {
                continue;
            };
            let relations = doc_labels.get(&(h, t)).copied().unwrap_or(&[]);
            if relations.is_empty() {
                multi_hot[[p, na_index]] = 1.0;
                continue;
            }
            for &r in relations {
                if r >= rel_size {
                    return Err(RexError::shape("relation label", format!("below {rel_size}"), r));
                }
                multi_hot[[p, r]] = 1.0;
            }
            truth[p] = truth_index(relations, na_index);
        }
        Ok(Self { multi_hot, truth })
    }

    /// Whether row `p` carries any label
    pub fn is_labelled(&self, p: usize) -> bool {
        self.multi_hot.row(p).iter().any(|&v| v != 0.0)
    }
}

/// Smallest non-NA relation of a label set, or NA
pub fn truth_index(relations: &[usize], na_index: usize) -> usize {
    relations
        .iter()
        .copied()
        .filter(|&r| r != na_index)
        .min()
        .unwrap_or(na_index)
}

/// Binary cross-entropy with logits over labelled pairs, normalised by
/// `#labelled * rel_size`. Zero when no pair is labelled.
pub fn estimate_loss(logits: &Array2<f32>, targets: &PairTargets) -> Result<f32> {
    if logits.dim() != targets.multi_hot.dim() {
        return Err(RexError::shape(
            "pair logits",
            format!("{:?}", targets.multi_hot.dim()),
            format!("{:?}", logits.dim()),
        ));
    }
    let mut total = 0.0;
    let mut labelled = 0usize;
    for (p, (scores, gold)) in logits.rows().into_iter().zip(targets.multi_hot.rows()).enumerate() {
        if !targets.is_labelled(p) {
            continue;
        }
        labelled += 1;
        total += scores
            .iter()
            .zip(gold.iter())
            .map(|(&x, &y)| bce_with_logits(x, y))
            .sum::<f32>();
    }
    if labelled == 0 {
        return Ok(0.0);
    }
    Ok(total / (labelled * logits.ncols()) as f32)
}

// ============================================================================
// Class counts
// ============================================================================

/// Per-relation confusion counts; the NA class is never counted positive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCounts {
    pub true_positives: Vec<usize>,
    pub false_positives: Vec<usize>,
    pub false_negatives: Vec<usize>,
    /// Gold and prediction both NA
    pub true_negatives: usize,
    /// Pairs counted
    pub total: usize,
}

impl ClassCounts {
    pub fn new(rel_size: usize) -> Self {
        Self {
            true_positives: vec![0; rel_size],
            false_positives: vec![0; rel_size],
            false_negatives: vec![0; rel_size],
            true_negatives: 0,
            total: 0,
        }
    }

    /// Add another batch of counts
    pub fn merge(&mut self, other: &ClassCounts) {
        for (dst, src) in [
            (&mut self.true_positives, &other.true_positives),
            (&mut self.false_positives, &other.false_positives),
            (&mut self.false_negatives, &other.false_negatives),
        ] {
            if dst.len() < src.len() {
                dst.resize(src.len(), 0);
            }
            for (d, s) in dst.iter_mut().zip(src) {
                *d += s;
            }
        }
        self.true_negatives += other.true_negatives;
        self.total += other.total;
    }

    /// Micro precision over non-NA classes
    pub fn precision(&self) -> f32 {
        let tp: usize = self.true_positives.iter().sum();
        let fp: usize = self.false_positives.iter().sum();
        if tp + fp == 0 {
            0.0
        } else {
            tp as f32 / (tp + fp) as f32
        }
    }

    /// Micro recall over non-NA classes
    pub fn recall(&self) -> f32 {
        let tp: usize = self.true_positives.iter().sum();
        let fn_: usize = self.false_negatives.iter().sum();
        if tp + fn_ == 0 {
            0.0
        } else {
            tp as f32 / (tp + fn_) as f32
        }
    }

    pub fn f1_score(&self) -> f32 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

/// Count argmax predictions against single gold classes
pub fn count_predictions(logits: &Array2<f32>, truth: &[usize], na_index: usize) -> Result<ClassCounts> {
    if logits.nrows() != truth.len() {
        return Err(RexError::shape("gold classes", logits.nrows(), truth.len()));
    }
    let mut counts = ClassCounts::new(logits.ncols());
    for (pred, &gold) in argmax_rows(logits).into_iter().zip(truth) {
        counts.total += 1;
        match (pred == na_index, gold == na_index) {
            (true, true) => counts.true_negatives += 1,
            _ if pred == gold => counts.true_positives[gold] += 1,
            (pred_na, gold_na) => {
                if !pred_na {
                    counts.false_positives[pred] += 1;
                }
                if !gold_na {
                    counts.false_negatives[gold] += 1;
                }
            }
        }
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn label(head: usize, tail: usize, relations: Vec<usize>) -> PairLabel {
        PairLabel {
            head,
            tail,
            relations,
        }
    }

    #[test]
    fn test_targets_fill_na_for_unlabelled_pairs() {
        let labels = vec![label(0, 1, vec![2, 1])];
        let pairs = [(0, 0, 1), (0, 1, 0), (1, 0, 1)];
        let targets = PairTargets::build(&pairs, &[Some(&labels), None], 3, 0).unwrap();
        assert_eq!(
            targets.multi_hot,
            array![[0.0, 1.0, 1.0], [1.0, 0.0, 0.0], [0.0, 0.0, 0.0]]
        );
        assert_eq!(targets.truth, vec![1, 0, 0]);
        assert!(!targets.is_labelled(2));
    }

    #[test]
    fn test_truth_index_skips_na() {
        assert_eq!(truth_index(&[0, 3, 2], 0), 2);
        assert_eq!(truth_index(&[0], 0), 0);
        assert_eq!(truth_index(&[], 4), 4);
    }

    #[test]
    fn test_loss_normalisation() {
        let pairs = [(0, 0, 1), (0, 1, 0)];
        let labels = vec![label(0, 1, vec![1])];
        let targets = PairTargets::build(&pairs, &[Some(&labels)], 2, 0).unwrap();
        let logits = Array2::zeros((2, 2));
        let loss = estimate_loss(&logits, &targets).unwrap();
        assert!((loss - 2.0f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_loss_zero_without_labels() {
        let targets = PairTargets::build(&[(0, 0, 1)], &[None], 2, 0).unwrap();
        assert_eq!(estimate_loss(&Array2::ones((1, 2)), &targets).unwrap(), 0.0);
        let empty = PairTargets::build(&[], &[], 2, 0).unwrap();
        assert_eq!(estimate_loss(&Array2::zeros((0, 2)), &empty).unwrap(), 0.0);
    }

    #[test]
    fn test_count_predictions() {
        // predictions: 1, 0, 2, 0
        let logits = array![[0.0, 5.0, 0.0], [5.0, 0.0, 0.0], [0.0, 0.0, 5.0], [5.0, 0.0, 0.0]];
        let counts = count_predictions(&logits, &[1, 2, 1, 0], 0).unwrap();
        assert_eq!(counts.true_positives, vec![0, 1, 0]);
        assert_eq!(counts.false_positives, vec![0, 0, 1]);
        assert_eq!(counts.false_negatives, vec![0, 1, 1]);
        assert_eq!(counts.true_negatives, 1);
        assert_eq!(counts.total, 4);
        assert!((counts.precision() - 0.5).abs() < 1e-6);
        assert!((counts.recall() - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_merge_counts() {
        let mut a = ClassCounts::new(2);
        a.true_positives[1] = 2;
        let mut b = ClassCounts::new(2);
        b.true_positives[1] = 1;
        b.true_negatives = 3;
        b.total = 4;
        a.merge(&b);
        assert_eq!(a.true_positives, vec![0, 3]);
        assert_eq!((a.true_negatives, a.total), (3, 4));
    }
}
