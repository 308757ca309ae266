//! Subject-marked sentence windows with packed object candidates

use super::document::{MarkerDocument, NerSpan};
use crate::tokenizer::{Tokenizer, CLS_TOKEN, SEP_TOKEN};
use rand::seq::SliceRandom;
use rand::RngCore;
use rex_core::{MarkerRelationSchema, PlMarkerConfig, Result, RexError, Vocabulary};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Word position of the `NIL` subject added in training
pub const NIL_POSITION: usize = 10000;

/// Sub-word slots reserved for `[CLS]`, `[SEP]` and the two subject markers
const RESERVED_SLOTS: usize = 4;

/// `(document, sentence)`
pub type SentenceIndex = (usize, usize);

/// One object paired with the example's subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCandidate {
    /// Position of the object's first sub-word in the marked tokens
    pub left: usize,
    /// Position of the object's last sub-word in the marked tokens
    pub right: usize,
    /// Entity-type id of the object
    pub ner_label: usize,
    /// Relation label id, 0 when the pair is unrelated
    pub label: usize,
    /// Inclusive word span of the object
    pub span: (usize, usize),
}

/// The subject an example is built around
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectMarker {
    /// Word span with its type name; `None` for the `NIL` subject
    pub entity: Option<NerSpan>,
    /// Positions of the opening and closing marker
    pub position: (usize, usize),
    /// Entity-type id, `-1` for `NIL`
    pub label: i64,
}

impl SubjectMarker {
    pub fn is_nil(&self) -> bool {
        self.entity.is_none()
    }

    fn span(&self) -> (usize, usize) {
        self.entity
            .as_ref()
            .map_or((NIL_POSITION, NIL_POSITION), NerSpan::span)
    }
}

/// One classifier input: a marked sentence window and up to
/// `max_pair_length` objects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerExample {
    pub index: SentenceIndex,
    /// Window tokens with the subject markers inserted
    pub tokens: Vec<String>,
    pub subject: SubjectMarker,
    pub objects: Vec<ObjectCandidate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GoldEntity {
    pub index: SentenceIndex,
    pub span: (usize, usize),
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GoldPair {
    pub index: SentenceIndex,
    pub subject: (usize, usize),
    pub object: (usize, usize),
    pub label: String,
}

/// Relation whose arguments also carry their gold entity types
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GoldTypedPair {
    pub index: SentenceIndex,
    pub subject: NerSpan,
    pub object: NerSpan,
    pub label: String,
}

/// Gold sets and recall denominators gathered while building
#[derive(Debug, Clone, Default)]
pub struct GoldSets {
    pub entities: HashSet<GoldEntity>,
    pub relations: HashSet<GoldPair>,
    pub relations_with_ner: HashSet<GoldTypedPair>,
    /// Gold entity count
    pub ner_total: usize,
    /// Gold relation count, symmetric relations counted twice
    pub relation_total: usize,
}

/// Output of [`MarkerExampleBuilder::build`]
#[derive(Debug, Clone, Default)]
pub struct MarkerDataset {
    pub examples: Vec<MarkerExample>,
    pub gold: GoldSets,
    /// Candidate entities per sentence
    pub predicted_ner: BTreeMap<SentenceIndex, Vec<NerSpan>>,
    /// Most objects seen for one subject
    pub max_objects: usize,
    /// Longest document in sub-words
    pub max_subwords: usize,
}

/// Left and right context lengths around a sentence.
///
/// The shorter side takes up to half of the spare budget first; the longer
/// side gets the rest. A sentence that fills the budget gets no context.
pub fn context_window(budget: usize, left: usize, sentence: usize, right: usize) -> (usize, usize) {
    if sentence >= budget {
        return (0, 0);
    }
    let half = (budget - sentence) / 2;
    if left < right {
        let left_ctx = left.min(half);
        (left_ctx, right.min(budget - left_ctx - sentence))
    } else {
        let right_ctx = right.min(half);
        (left.min(budget - right_ctx - sentence), right_ctx)
    }
}

/// Move object boundaries past the subject markers inserted before them
pub fn shift_object(left: usize, right: usize, object: (usize, usize), subject: (usize, usize)) -> (usize, usize) {
    let shift = |pos: usize, word: usize| {
        let mut pos = pos;
        if word >= subject.0 {
            pos += 1;
            if word > subject.1 {
                pos += 1;
            }
        }
        pos
    };
    (shift(left, object.0), shift(right, object.1))
}

/// Sub-word layout of one document
struct SubwordDocument {
    subwords: Vec<String>,
    /// Sub-word offset of every word, plus the total at the end
    word_starts: Vec<usize>,
    /// Sub-word offset of every sentence boundary
    sentence_starts: Vec<usize>,
}

impl SubwordDocument {
    fn new(doc: &MarkerDocument, tokenizer: &dyn Tokenizer) -> Self {
        let mut subwords = Vec::new();
        let mut word_starts = vec![0];
        let mut sentence_starts = vec![0];
        for sentence in &doc.sentences {
            for word in sentence {
                subwords.extend(tokenizer.tokenize_words(word));
                word_starts.push(subwords.len());
            }
            sentence_starts.push(subwords.len());
        }
        Self {
            subwords,
            word_starts,
            sentence_starts,
        }
    }

    /// `[start, end)` sub-words of an inclusive word span
    fn span(&self, start: usize, end: usize) -> Result<(usize, usize)> {
        match (self.word_starts.get(start), self.word_starts.get(end + 1)) {
            (Some(&s), Some(&e)) if start <= end => Ok((s, e)),
            _ => Err(RexError::InvalidDocument(format!(
                "span [{start}, {end}] is outside a document of {} words",
                self.word_starts.len() - 1
            ))),
        }
    }
}

/// Sub-word position relative to the window start
fn relative(position: usize, offset: usize, index: SentenceIndex) -> Result<usize> {
    position.checked_sub(offset).ok_or_else(|| {
        RexError::InvalidDocument(format!(
            "entity at sub-word {position} of sentence {index:?} lies before its window"
        ))
    })
}

/// Enumerates subject/object pairs over every sentence
pub struct MarkerExampleBuilder {
    tokenizer: Arc<dyn Tokenizer>,
    schema: Arc<MarkerRelationSchema>,
    types: Arc<Vocabulary>,
    config: PlMarkerConfig,
}

impl MarkerExampleBuilder {
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        schema: Arc<MarkerRelationSchema>,
        types: Arc<Vocabulary>,
        config: PlMarkerConfig,
    ) -> Self {
        Self {
            tokenizer,
            schema,
            types,
            config,
        }
    }

    pub fn config(&self) -> &PlMarkerConfig {
        &self.config
    }

    pub fn tokenizer(&self) -> &dyn Tokenizer {
        self.tokenizer.as_ref()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Opening and closing subject marker for an entity type
    fn subject_markers(&self, type_id: usize) -> (String, String) {
        if self.config.use_typemarker {
            (
                format!("[unused{}]", 2 + type_id),
                format!("[unused{}]", 2 + type_id + self.types.len()),
            )
        } else {
            ("[unused0]".to_string(), "[unused1]".to_string())
        }
    }

    /// Build examples for every sentence of every document.
    ///
    /// Training adds a `NIL` subject per sentence. `rng` only matters when
    /// shuffling is enabled.
    pub fn build(&self, docs: &[MarkerDocument], training: bool, rng: &mut dyn RngCore) -> Result<MarkerDataset> {
        let mut dataset = MarkerDataset::default();
        for (d, doc) in docs.iter().enumerate() {
            doc.validate(d)?;
            for relation in doc.relations.iter().flatten() {
                dataset.gold.relation_total += if self.schema.is_symmetric(relation.label()) { 2 } else { 1 };
            }
            let layout = SubwordDocument::new(doc, self.tokenizer.as_ref());
            dataset.max_subwords = dataset.max_subwords.max(layout.subwords.len());
            for n in 0..doc.sentences.len() {
                self.build_sentence(doc, &layout, (d, n), training, rng, &mut dataset)?;
            }
        }
        info!(
            documents = docs.len(),
            examples = dataset.examples.len(),
            max_objects = dataset.max_objects,
            training,
            "Built PLMarker examples"
        );
        Ok(dataset)
    }

    fn build_sentence(
        &self,
        doc: &MarkerDocument,
        layout: &SubwordDocument,
        index: SentenceIndex,
        training: bool,
        rng: &mut dyn RngCore,
        dataset: &mut MarkerDataset,
    ) -> Result<()> {
        let n = index.1;
        let candidates = &doc.candidate_ner()[n];
        let gold_ner = &doc.ner[n];
        let relations = &doc.relations[n];

        // gold entities
        dataset.gold.ner_total += gold_ner.len();
        let mut gold_types: HashMap<(usize, usize), &NerSpan> = HashMap::new();
        for entity in gold_ner {
            gold_types.insert(entity.span(), entity);
            dataset.gold.entities.insert(GoldEntity {
                index,
                span: entity.span(),
                label: entity.label().to_string(),
            });
        }
        dataset.predicted_ner.insert(index, candidates.clone());

        // window
        let budget = self.config.max_seq_length - RESERVED_SLOTS;
        let (sent_start, sent_end) = (layout.sentence_starts[n], layout.sentence_starts[n + 1]);
        let (left_ctx, right_ctx) = context_window(
            budget,
            sent_start,
            sent_end - sent_start,
            layout.subwords.len() - sent_end,
        );
        let doc_offset = sent_start - left_ctx;
        let window_end = sent_end + right_ctx;
        let mut target = vec![CLS_TOKEN.to_string()];
        target.extend(
            layout.subwords[doc_offset..window_end]
                .iter()
                .take(budget)
                .cloned(),
        );
        target.push(SEP_TOKEN.to_string());

        // labels and gold relation sets
        let mut pos2label: HashMap<(usize, usize, usize, usize), usize> = HashMap::new();
        for relation in relations {
            let (sub, obj) = (relation.subject(), relation.object());
            let label = relation.label().to_string();
            pos2label.insert((sub.0, sub.1, obj.0, obj.1), self.schema.label_id(&label)?);
            let typed = |span: (usize, usize)| {
                gold_types.get(&span).map(|e| (*e).clone()).ok_or_else(|| {
                    RexError::InvalidDocument(format!(
                        "relation argument {span:?} of sentence {index:?} is not a gold entity"
                    ))
                })
            };
            let (sub_entity, obj_entity) = (typed(sub)?, typed(obj)?);
            dataset.gold.relations.insert(GoldPair {
                index,
                subject: sub,
                object: obj,
                label: label.clone(),
            });
            dataset.gold.relations_with_ner.insert(GoldTypedPair {
                index,
                subject: sub_entity.clone(),
                object: obj_entity.clone(),
                label: label.clone(),
            });
            if self.schema.is_symmetric(&label) {
                dataset.gold.relations.insert(GoldPair {
                    index,
                    subject: obj,
                    object: sub,
                    label: label.clone(),
                });
                dataset.gold.relations_with_ner.insert(GoldTypedPair {
                    index,
                    subject: obj_entity,
                    object: sub_entity,
                    label,
                });
            }
        }
        for relation in relations {
            let (sub, obj) = (relation.subject(), relation.object());
            let reverse = (obj.0, obj.1, sub.0, sub.1);
            if !pos2label.contains_key(&reverse) {
                pos2label.insert(reverse, self.schema.reverse_label_id(relation.label())?);
            }
        }

        // subjects
        let mut subjects: Vec<Option<&NerSpan>> = candidates.iter().map(Some).collect();
        if training {
            subjects.push(None);
        }
        let limit = self.config.max_seq_length - 1;
        for subject in subjects {
            let (marker, tokens) = match subject {
                Some(entity) => {
                    let (start, end) = layout.span(entity.start(), entity.end())?;
                    let sub_s = relative(start, doc_offset, index)? + 1;
                    let sub_e = relative(end, doc_offset, index)?;
                    let type_id = self.types.require(entity.label())?;
                    if sub_e < sub_s || sub_e + 2 >= limit || sub_e >= target.len() {
                        debug!(?index, span = ?entity.span(), "subject outside the window");
                        continue;
                    }
                    let (open, close) = self.subject_markers(type_id);
                    let mut tokens = target[..sub_s].to_vec();
                    tokens.push(open);
                    tokens.extend_from_slice(&target[sub_s..=sub_e]);
                    tokens.push(close);
                    tokens.extend_from_slice(&target[sub_e + 1..]);
                    let marker = SubjectMarker {
                        entity: Some(entity.clone()),
                        position: (sub_s, sub_e + 2),
                        label: type_id as i64,
                    };
                    (marker, tokens)
                }
                None => {
                    let (sub_s, sub_e) = (target.len(), target.len() + 1);
                    if sub_e >= limit {
                        continue;
                    }
                    let mut tokens = target.clone();
                    tokens.push("[unused0]".to_string());
                    tokens.push("[unused1]".to_string());
                    let marker = SubjectMarker {
                        entity: None,
                        position: (sub_s, sub_e),
                        label: -1,
                    };
                    (marker, tokens)
                }
            };

            let sub_span = marker.span();
            let mut objects = Vec::new();
            for object in candidates {
                if self.config.skip_self_pairs && object.span() == sub_span {
                    continue;
                }
                let (start, end) = layout.span(object.start(), object.end())?;
                let (left, right) = shift_object(
                    relative(start, doc_offset, index)? + 1,
                    relative(end, doc_offset, index)?,
                    object.span(),
                    sub_span,
                );
                if right >= limit {
                    continue;
                }
                let label = pos2label
                    .get(&(sub_span.0, sub_span.1, object.start(), object.end()))
                    .copied()
                    .unwrap_or(0);
                objects.push(ObjectCandidate {
                    left,
                    right,
                    ner_label: self.types.require(object.label())?,
                    label,
                    span: object.span(),
                });
            }
            dataset.max_objects = dataset.max_objects.max(objects.len());
            if self.config.shuffle {
                objects.shuffle(rng);
            }
            for chunk in objects.chunks(self.config.max_pair_length) {
                dataset.examples.push(MarkerExample {
                    index,
                    tokens: tokens.clone(),
                    subject: marker.clone(),
                    objects: chunk.to_vec(),
                });
            }
        }
        debug!(?index, window = target.len(), "sentence done");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::tokenizer::BasicTokenizer;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rex_core::RelationSchemaFile;

    pub(crate) fn builder(config: PlMarkerConfig) -> MarkerExampleBuilder {
        let tokenizer = BasicTokenizer::with_words(
            ["alice", "works", "at", "acme", "she", "lives", "in", "paris", "."],
            true,
        )
        .unwrap();
        let schema = MarkerRelationSchema::new(
            RelationSchemaFile {
                relation: vec!["NA".into(), "ORG-AFF".into(), "PER-SOC".into()],
                sym: vec!["PER-SOC".into()],
                no_sym: vec!["NA".into()],
            },
            false,
        );
        let types = Vocabulary::from_names(["PER", "ORG", "LOC"]);
        MarkerExampleBuilder::new(Arc::new(tokenizer), Arc::new(schema), Arc::new(types), config)
    }

    pub(crate) fn document() -> MarkerDocument {
        MarkerDocument::parse_lines(
            r#"{"sentences": [["Alice", "works", "at", "Acme", "."], ["She", "lives", "in", "Paris"]], "ner": [[[0, 0, "PER"], [3, 3, "ORG"]], [[5, 5, "PER"], [8, 8, "LOC"]]], "relations": [[[0, 0, 3, 3, "ORG-AFF"]], [[5, 5, 8, 8, "PER-SOC"]]]}"#,
        )
        .unwrap()
        .remove(0)
    }

    #[test]
    fn test_context_window() {
        // short left side takes what it has, right side fills the rest
        assert_eq!(context_window(10, 1, 4, 20), (1, 5));
        // longer left side: right takes at most half
        assert_eq!(context_window(10, 20, 4, 1), (5, 1));
        assert_eq!(context_window(10, 20, 4, 20), (3, 3));
        assert_eq!(context_window(4, 3, 4, 3), (0, 0));
        assert_eq!(context_window(4, 3, 9, 3), (0, 0));
    }

    #[test]
    fn test_shift_object_across_markers() {
        // object after the subject moves past both markers
        assert_eq!(shift_object(5, 5, (3, 3), (0, 0)), (7, 7));
        // object before the subject stays
        assert_eq!(shift_object(1, 1, (0, 0), (3, 3)), (1, 1));
        // object overlapping the subject start moves by one
        assert_eq!(shift_object(2, 4, (2, 4), (2, 3)), (3, 6));
        // NIL subject never shifts
        assert_eq!(shift_object(2, 3, (2, 3), (NIL_POSITION, NIL_POSITION)), (2, 3));
    }

    #[test]
    fn test_build_eval_examples() {
        let builder = builder(PlMarkerConfig {
            max_seq_length: 32,
            ..PlMarkerConfig::default()
        });
        let mut rng = StdRng::seed_from_u64(0);
        let dataset = builder.build(&[document()], false, &mut rng).unwrap();
        // two subjects per sentence, two objects each
        assert_eq!(dataset.examples.len(), 4);
        let first = &dataset.examples[0];
        assert_eq!(first.index, (0, 0));
        // whole document fits: [CLS] 9 words [SEP], plus markers around "alice"
        assert_eq!(first.tokens.len(), 13);
        assert_eq!(&first.tokens[..4], &["[CLS]", "[unused0]", "alice", "[unused1]"]);
        assert_eq!(first.subject.position, (1, 3));
        assert_eq!(first.objects[1].left, 6);
        assert_eq!(first.objects[1].label, 1);
        assert_eq!(first.objects[0].label, 0);

        // reverse direction of a non-symmetric label: id + |rel| - |sym|
        let acme = &dataset.examples[1];
        assert_eq!(acme.objects[0].label, 1 + 3 - 2);
        // symmetric label keeps its id in reverse
        let paris = &dataset.examples[3];
        assert_eq!(paris.objects[0].label, 2);

        assert_eq!(dataset.gold.ner_total, 4);
        assert_eq!(dataset.gold.relation_total, 3);
        assert_eq!(dataset.gold.relations.len(), 3);
        assert_eq!(dataset.gold.relations_with_ner.len(), 3);
    }

    #[test]
    fn test_training_adds_nil_subject() {
        let builder = builder(PlMarkerConfig {
            max_seq_length: 32,
            ..PlMarkerConfig::default()
        });
        let mut rng = StdRng::seed_from_u64(0);
        let dataset = builder.build(&[document()], true, &mut rng).unwrap();
        assert_eq!(dataset.examples.len(), 6);
        let nil = dataset.examples.iter().find(|e| e.subject.is_nil()).unwrap();
        assert_eq!(nil.subject.label, -1);
        assert_eq!(nil.subject.position, (11, 12));
        assert!(nil.objects.iter().all(|o| o.label == 0));
        assert_eq!(nil.tokens.last().map(String::as_str), Some("[unused1]"));
    }

    #[test]
    fn test_chunking_and_skip_self() {
        let builder = builder(PlMarkerConfig {
            max_seq_length: 32,
            max_pair_length: 1,
            skip_self_pairs: true,
            use_typemarker: true,
            ..PlMarkerConfig::default()
        });
        let mut rng = StdRng::seed_from_u64(0);
        let dataset = builder.build(&[document()], false, &mut rng).unwrap();
        assert_eq!(dataset.examples.len(), 4);
        assert!(dataset.examples.iter().all(|e| e.objects.len() == 1));
        // ORG is type 1 of 3: markers [unused3] / [unused6]
        let acme = &dataset.examples[1];
        assert_eq!(acme.tokens[4], "[unused3]");
        assert_eq!(acme.tokens[6], "[unused6]");
    }

    #[test]
    fn test_long_document_is_windowed() {
        let builder = builder(PlMarkerConfig {
            max_seq_length: 9,
            ..PlMarkerConfig::default()
        });
        let mut rng = StdRng::seed_from_u64(0);
        let dataset = builder.build(&[document()], false, &mut rng).unwrap();
        // budget 5: second sentence (4 sub-words) gets 1 word of left context
        let second = dataset
            .examples
            .iter()
            .find(|e| e.index == (0, 1))
            .unwrap();
        assert_eq!(second.tokens.len(), 5 + 2 + 2);
        assert_eq!(second.tokens[1], ".");
        assert!(dataset.examples.iter().all(|e| e.objects.iter().all(|o| o.right < 8)));
    }

    #[test]
    fn test_unknown_type_is_an_error() {
        let mut doc = document();
        doc.ner[0][0].2 = "GPE".to_string();
        let mut rng = StdRng::seed_from_u64(0);
        let result = builder(PlMarkerConfig::default()).build(&[doc], false, &mut rng);
        assert!(result.is_err());
    }
}
