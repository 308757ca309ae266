//! Quality Metrics module
//!
//! Set-based triple metrics for OneRel, gold-set scoring for PLMarker and
//! the JSON-lines validation dump of mismatching examples.

use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rex_core::{OutputConfig, RelationTriple, Result, RexError};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::plmarker::{GoldEntity, GoldPair, GoldSets, GoldTypedPair};

// ============================================================================
// Triple Metrics
// ============================================================================

/// Correct / predicted / gold counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripleMetrics {
    pub correct: usize,
    pub predicted: usize,
    pub gold: usize,
}

impl TripleMetrics {
    /// Count one example; both sides are deduplicated
    pub fn from_sets<T: Eq + std::hash::Hash>(predicted: &HashSet<T>, gold: &HashSet<T>) -> Self {
        Self {
            correct: predicted.intersection(gold).count(),
            predicted: predicted.len(),
            gold: gold.len(),
        }
    }

    pub fn merge(&mut self, other: &Self) {
        self.correct += other.correct;
        self.predicted += other.predicted;
        self.gold += other.gold;
    }

    /// Calculate precision (correct / predicted)
    pub fn precision(&self) -> f32 {
        if self.predicted == 0 {
            0.0
        } else {
            self.correct as f32 / self.predicted as f32
        }
    }

    /// Calculate recall (correct / gold)
    pub fn recall(&self) -> f32 {
        if self.gold == 0 {
            0.0
        } else {
            self.correct as f32 / self.gold as f32
        }
    }

    /// Calculate F1 score (2 * P * R / (P + R))
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

// ============================================================================
// Validation Records
// ============================================================================

/// One line of the validation dump
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub text: String,
    pub golds: Vec<RelationTriple>,
    pub preds: Vec<RelationTriple>,
    /// Predicted but not gold
    pub new: Vec<RelationTriple>,
    /// Gold but not predicted
    pub lack: Vec<RelationTriple>,
}

impl ValidationRecord {
    pub fn new(text: impl Into<String>, preds: &BTreeSet<RelationTriple>, golds: &BTreeSet<RelationTriple>) -> Self {
        Self {
            text: text.into(),
            golds: golds.iter().cloned().collect(),
            preds: preds.iter().cloned().collect(),
            new: preds.difference(golds).cloned().collect(),
            lack: golds.difference(preds).cloned().collect(),
        }
    }

    pub fn has_difference(&self) -> bool {
        !self.new.is_empty() || !self.lack.is_empty()
    }
}

/// JSON-lines writer for [`ValidationRecord`]s
pub struct ValidationWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl ValidationWriter {
    /// Create the file and its parent directories
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let io_error = |source| RexError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let file = File::create(&path).map_err(io_error)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    /// `val_output_{epoch}.json` under the configured output directory
    pub fn for_epoch(output: &OutputConfig, epoch: usize) -> Result<Self> {
        Self::create(output.validation_file(epoch))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn write(&mut self, record: &ValidationRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        writeln!(self.writer, "{line}").map_err(|source| RexError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.written += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<usize> {
        self.writer.flush().map_err(|source| RexError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(self.written)
    }
}

// ============================================================================
// Triple Evaluator
// ============================================================================

/// Accumulates OneRel predictions example by example
#[derive(Debug, Default)]
pub struct TripleEvaluator {
    triples: TripleMetrics,
    partial: TripleMetrics,
    num_documents: usize,
}

impl TripleEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score one example. Returns the validation record when the prediction
    /// differs from the gold set.
    pub fn add(
        &mut self,
        text: &str,
        predicted: &[RelationTriple],
        gold: &[RelationTriple],
    ) -> Option<ValidationRecord> {
        let preds: BTreeSet<RelationTriple> = predicted.iter().cloned().collect();
        let golds: BTreeSet<RelationTriple> = gold.iter().cloned().collect();
        self.triples.merge(&TripleMetrics {
            correct: preds.intersection(&golds).count(),
            predicted: preds.len(),
            gold: golds.len(),
        });

        let sub_rel = |set: &BTreeSet<RelationTriple>| -> HashSet<(String, String)> {
            set.iter()
                .map(|t| (t.subject.clone(), t.relation.clone()))
                .collect()
        };
        self.partial
            .merge(&TripleMetrics::from_sets(&sub_rel(&preds), &sub_rel(&golds)));
        self.num_documents += 1;

        let record = ValidationRecord::new(text, &preds, &golds);
        record.has_difference().then_some(record)
    }

    /// Score every example and dump the mismatching ones through `writer`
    pub fn evaluate_all<'a, I>(&mut self, examples: I, writer: &mut ValidationWriter) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a [RelationTriple], &'a [RelationTriple])>,
    {
        for (text, predicted, gold) in examples {
            if let Some(record) = self.add(text, predicted, gold) {
                writer.write(&record)?;
            }
        }
        Ok(())
    }

    pub fn finish(self) -> AggregateMetrics {
        let metrics = AggregateMetrics {
            triples: self.triples,
            sub_relation: self.partial,
            num_documents: self.num_documents,
            evaluated_at: Utc::now(),
        };
        info!(
            documents = metrics.num_documents,
            correct = metrics.triples.correct,
            predicted = metrics.triples.predicted,
            gold = metrics.triples.gold,
            f1 = metrics.triples.f1_score(),
            "Triple evaluation finished"
        );
        metrics
    }
}

// ============================================================================
// Aggregate Metrics
// ============================================================================

/// Aggregate metrics for a batch of evaluations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub triples: TripleMetrics,
    /// Matching on `(subject, relation)` only
    pub sub_relation: TripleMetrics,
    pub num_documents: usize,
    pub evaluated_at: DateTime<Utc>,
}

impl AggregateMetrics {
    /// Print a summary report
    pub fn report(&self) -> String {
        format!(
            "=== Relation Extraction Report ===\n\
             Evaluated at: {}\n\n\
             Documents evaluated: {}\n\n\
             Triples:\n\
               Precision: {:.1}%\n\
               Recall:    {:.1}%\n\
               F1 Score:  {:.1}%\n\
               Gold: {} | Predicted: {} | Correct: {}\n\n\
             Subject + Relation:\n\
               Precision: {:.1}%\n\
               Recall:    {:.1}%\n\
               F1 Score:  {:.1}%\n\
               Gold: {} | Predicted: {} | Correct: {}\n",
            self.evaluated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.num_documents,
            self.triples.precision() * 100.0,
            self.triples.recall() * 100.0,
            self.triples.f1_score() * 100.0,
            self.triples.gold,
            self.triples.predicted,
            self.triples.correct,
            self.sub_relation.precision() * 100.0,
            self.sub_relation.recall() * 100.0,
            self.sub_relation.f1_score() * 100.0,
            self.sub_relation.gold,
            self.sub_relation.predicted,
            self.sub_relation.correct,
        )
    }
}

// ============================================================================
// Span Pair Metrics
// ============================================================================

/// PLMarker scores against the gold sets collected while building examples
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkerMetrics {
    pub ner: TripleMetrics,
    pub relation: TripleMetrics,
    /// Relation correct only when both argument types also match
    pub relation_with_ner: TripleMetrics,
}

impl MarkerMetrics {
    /// Recall uses the gold totals, so symmetric relations count twice
    pub fn score(
        gold: &GoldSets,
        entities: &HashSet<GoldEntity>,
        relations: &HashSet<GoldPair>,
        typed_relations: &HashSet<GoldTypedPair>,
    ) -> Self {
        Self {
            ner: TripleMetrics {
                correct: entities.intersection(&gold.entities).count(),
                predicted: entities.len(),
                gold: gold.ner_total,
            },
            relation: TripleMetrics {
                correct: relations.intersection(&gold.relations).count(),
                predicted: relations.len(),
                gold: gold.relation_total,
            },
            relation_with_ner: TripleMetrics {
                correct: typed_relations.intersection(&gold.relations_with_ner).count(),
                predicted: typed_relations.len(),
                gold: gold.relation_total,
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
