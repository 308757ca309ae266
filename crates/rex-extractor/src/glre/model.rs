//! GLRE forward pass: words, graph nodes, RGCN, pair features, stages

use super::batch::{GlreBatch, GlreDocument, PairLabel};
use super::distance::{distance_matrix, DistanceFeature};
use super::encoder::{mention_contexts, WordEncoder};
use super::features::{DocumentFeatures, FeatureSource};
use super::local::{LocalInputs, LocalRepLayer};
use super::loss::{count_predictions, estimate_loss, ClassCounts, PairTargets};
use super::select::{PairSelection, PairSelector};
use super::stages::{Classifier, ContextAttention, Mlp, PairStage};
use ndarray::{concatenate, s, Array2, Axis};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rex_core::{GlreConfig, QueryMode, Result, RexError, Vocabularies};
use rex_graph::{DocumentNodes, NodeArena, NodeBuilder, Rgcn};
use rex_nn::ops::sigmoid;
use rex_nn::{Embedding, Mode, TokenEncoder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Node types that get a type embedding
const NODE_TYPES: usize = 3;

/// Logits of every selected pair
#[derive(Debug, Clone)]
pub struct GlreOutput {
    /// `(P, rel_size)` unnormalised scores
    pub logits: Array2<f32>,
    pub selection: PairSelection,
}

/// One relation emitted for an entity pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairPrediction {
    pub document: String,
    pub head: usize,
    pub tail: usize,
    pub relation: String,
    pub relation_id: usize,
    pub score: f32,
    /// No sentence holds mentions of both entities
    pub cross: bool,
}

/// Loss and counts over a labelled batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlreEvaluation {
    pub loss: f32,
    pub counts: ClassCounts,
    pub pairs: usize,
}

/// Graph-based local and global representation model
pub struct GlreModel {
    config: GlreConfig,
    vocabularies: Vocabularies,
    words: WordEncoder,
    nodes: NodeBuilder,
    type_embedding: Option<Embedding>,
    rgcn: Rgcn,
    local: Option<LocalRepLayer>,
    distance: Option<DistanceFeature>,
    selector: PairSelector,
    sources: Vec<FeatureSource>,
    stages: Vec<Box<dyn PairStage>>,
}

impl GlreModel {
    /// Build every layer from the configuration, seeded by `config.seed`
    pub fn new(config: GlreConfig, encoder: Arc<dyn TokenEncoder>, vocabularies: Vocabularies) -> Result<Self> {
        config.validate()?;
        if vocabularies.relations.len() != config.rel_size {
            return Err(RexError::Vocabulary(format!(
                "relation vocabulary has {} entries but rel_size is {}",
                vocabularies.relations.len(),
                config.rel_size
            )));
        }
        let mut rng = StdRng::seed_from_u64(config.seed);
        let words = WordEncoder::new(encoder, &config, &mut rng);

        let type_embedding = config
            .types
            .then(|| Embedding::new(NODE_TYPES, config.type_dim, None, &mut rng));
        let node_dim = words.output_dim() + type_embedding.as_ref().map_or(0, Embedding::dim);
        let rgcn = Rgcn::new(
            node_dim,
            config.rgcn_hidden_dim,
            config.rgcn_num_layers,
            config.relation_count,
            config.gcn_in_drop,
            config.gcn_out_drop,
            &mut rng,
        );

        let local = if config.local_rep {
            let query_dim = match config.query {
                QueryMode::Init => words.output_dim(),
                QueryMode::Global => rgcn.output_dim(),
            };
            Some(LocalRepLayer::new(
                query_dim,
                words.output_dim(),
                config.att_head_num,
                config.att_dropout,
                &mut rng,
            )?)
        } else {
            None
        };
        let distance = config
            .finaldist
            .then(|| DistanceFeature::new(config.dist_dim, &mut rng));

        let sources = FeatureSource::resolve(&config);
        let side_width: usize = sources
            .iter()
            .map(|source| match source {
                FeatureSource::Global => rgcn.output_dim(),
                FeatureSource::Local => local.as_ref().map_or(0, LocalRepLayer::output_dim),
                FeatureSource::Distance => distance.as_ref().map_or(0, DistanceFeature::dim),
            })
            .sum();

        let mut stages: Vec<Box<dyn PairStage>> = Vec::new();
        let mut width = 2 * side_width;
        if config.context_att {
            let stage = ContextAttention::new(width, config.att_dropout, &mut rng)?;
            width = stage.output_dim();
            stages.push(Box::new(stage));
        }
        if config.mlp_layers > 0 {
            let stage = Mlp::new(width, config.mlp_dim, config.mlp_layers, &mut rng);
            width = stage.output_dim();
            stages.push(Box::new(stage));
        }
        stages.push(Box::new(Classifier::new(width, config.rel_size, config.drop_o, &mut rng)));

        let selector = PairSelector::from_config(&config, &vocabularies.types)?;
        info!(
            sources = ?sources,
            stages = ?stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            input_dim = 2 * side_width,
            "Initialised GLRE model"
        );

        Ok(Self {
            nodes: NodeBuilder::new(config.pooling),
            words,
            type_embedding,
            rgcn,
            local,
            distance,
            selector,
            sources,
            stages,
            vocabularies,
            config,
        })
    }

    pub fn config(&self) -> &GlreConfig {
        &self.config
    }

    /// Width of the concatenated pair vector entering the stages
    pub fn input_dim(&self) -> usize {
        self.sources
            .iter()
            .map(|source| match source {
                FeatureSource::Global => self.rgcn.output_dim(),
                FeatureSource::Local => self.local.as_ref().map_or(0, LocalRepLayer::output_dim),
                FeatureSource::Distance => self.distance.as_ref().map_or(0, DistanceFeature::dim),
            })
            .sum::<usize>()
            * 2
    }

    /// Pair logits for every selected pair of the batch
    pub fn forward(&self, batch: &GlreBatch, mode: Mode, rng: &mut dyn RngCore) -> Result<GlreOutput> {
        batch.validate(self.config.relation_count)?;

        let mut documents = Vec::with_capacity(batch.len());
        for doc in &batch.documents {
            let words = self.words.forward(doc, mode, rng)?;
            documents.push(self.nodes.build(&words, &doc.mentions, &doc.sentence_lengths)?);
        }

        let mut arena = NodeArena::from_documents(&documents)?;
        if let Some(types) = &self.type_embedding {
            let ids: Vec<usize> = arena.records().iter().map(|r| r.node_type.index()).collect();
            let features = types.lookup(&ids)?;
            arena = arena.with_features(&features)?;
        }
        let node_batch = arena.reorder();

        let mut graphs = Vec::with_capacity(batch.len());
        for (d, doc) in batch.documents.iter().enumerate() {
            let output = self
                .rgcn
                .forward(&node_batch.document(d).to_owned(), &doc.adjacency, mode, rng)?;
            debug!(
                document = %doc.id,
                isolated = output.isolated.iter().filter(|&&i| i).count(),
                "rgcn done"
            );
            graphs.push(output.nodes);
        }

        let selection = self.selector.select(&node_batch.padded_records());
        let mut blocks = Vec::with_capacity(batch.len());
        for (d, doc) in batch.documents.iter().enumerate() {
            let pairs: Vec<(usize, usize)> = selection
                .pairs
                .iter()
                .filter(|&&(b, _, _)| b == d)
                .map(|&(_, h, t)| (h, t))
                .collect();
            blocks.push(self.document_pairs(doc, &documents[d], &graphs[d], &pairs, mode, rng)?);
        }

        let mut x = if blocks.iter().all(|b| b.nrows() == 0) {
            Array2::zeros((0, self.input_dim()))
        } else {
            let views: Vec<_> = blocks.iter().filter(|b| b.nrows() > 0).map(|b| b.view()).collect();
            concatenate(Axis(0), &views).map_err(|e| RexError::shape("pair batch", "equal widths", e))?
        };

        let doc_of_pair = selection.documents();
        for stage in &self.stages {
            x = stage.forward(x, &doc_of_pair, mode, rng)?;
        }
        debug!(pairs = selection.len(), "GLRE forward done");
        Ok(GlreOutput { logits: x, selection })
    }

    /// `(P_doc, input_dim)` pair vectors of one document
    fn document_pairs(
        &self,
        doc: &GlreDocument,
        nodes: &DocumentNodes,
        graph: &Array2<f32>,
        pairs: &[(usize, usize)],
        mode: Mode,
        rng: &mut dyn RngCore,
    ) -> Result<Array2<f32>> {
        let entities = nodes.entities.nrows();

        let local = match &self.local {
            Some(layer) => {
                let queries = match self.config.query {
                    QueryMode::Init => nodes.entities.clone(),
                    QueryMode::Global => graph.slice(s![..entities, ..]).to_owned(),
                };
                let sentence_ids: Vec<usize> = doc.mentions.iter().map(|m| m.sentence_id).collect();
                let mention_entities: Vec<usize> = doc.mentions.iter().map(|m| m.entity_id).collect();
                let contexts = mention_contexts(&nodes.sentences, &sentence_ids)?;
                let inputs = LocalInputs {
                    entities: &queries,
                    mentions: &nodes.mentions,
                    contexts: &contexts,
                    mention_entities: &mention_entities,
                };
                Some(layer.forward(&inputs, pairs, mode, rng)?)
            }
            None => None,
        };

        let distances = match &self.distance {
            Some(_) => Some(match doc.distance_matrix(entities)? {
                Some(given) => given,
                None => distance_matrix(&doc.mentions, entities),
            }),
            None => None,
        };

        let features = DocumentFeatures {
            graph,
            local: local.as_ref(),
            distance: distances.as_ref().zip(self.distance.as_ref()),
        };
        let rows = features.pair_rows(&self.sources, pairs)?;
        if rows.nrows() == 0 {
            return Ok(Array2::zeros((0, self.input_dim())));
        }
        Ok(rows)
    }

    /// Relations whose sigmoid score reaches `threshold`, NA excluded
    pub fn predict(&self, batch: &GlreBatch, threshold: f32) -> Result<Vec<PairPrediction>> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let output = self.forward(batch, Mode::Eval, &mut rng)?;
        let mut predictions = Vec::new();
        for (p, &(d, h, t)) in output.selection.pairs.iter().enumerate() {
            let doc = &batch.documents[d];
            let cross = !shares_sentence(doc, h, t);
            for (r, &logit) in output.logits.row(p).iter().enumerate() {
                if r == self.config.na_index {
                    continue;
                }
                let score = sigmoid(logit);
                if score < threshold {
                    continue;
                }
                predictions.push(PairPrediction {
                    document: doc.id.clone(),
                    head: h,
                    tail: t,
                    relation: self
                        .vocabularies
                        .relations
                        .name(r)
                        .map_or_else(|| r.to_string(), str::to_string),
                    relation_id: r,
                    score,
                    cross,
                });
            }
        }
        info!(predictions = predictions.len(), "GLRE prediction done");
        Ok(predictions)
    }

    /// Multi-label loss and per-class counts in evaluation mode
    pub fn evaluate(&self, batch: &GlreBatch) -> Result<GlreEvaluation> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let output = self.forward(batch, Mode::Eval, &mut rng)?;
        let labels: Vec<Option<&[PairLabel]>> = batch
            .documents
            .iter()
            .map(|d| d.labels.as_deref())
            .collect();
        let targets = PairTargets::build(
            &output.selection.pairs,
            &labels,
            self.config.rel_size,
            self.config.na_index,
        )?;
        let loss = estimate_loss(&output.logits, &targets)?;
        let counts = count_predictions(&output.logits, &targets.truth, self.config.na_index)?;
        Ok(GlreEvaluation {
            loss,
            counts,
            pairs: output.selection.len(),
        })
    }
}

/// Whether some sentence holds mentions of both entities
fn shares_sentence(doc: &GlreDocument, head: usize, tail: usize) -> bool {
    let head_sentences: HashSet<usize> = doc
        .mentions
        .iter()
        .filter(|m| m.entity_id == head)
        .map(|m| m.sentence_id)
        .collect();
    doc.mentions
        .iter()
        .any(|m| m.entity_id == tail && head_sentences.contains(&m.sentence_id))
}
