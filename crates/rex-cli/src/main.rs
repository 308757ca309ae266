//! REX CLI - Command-line interface
//!
//! Usage:
//!   rex decode <cubes.jsonl> --relations rel2id.json
//!   rex evaluate <predictions.jsonl> --epoch 3
//!   rex plmarker <docs.jsonl> --schema rel.json --types ner.json --vocab vocab.txt
//!   rex glre <batch.json> --vocab-dir meta/

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rex_core::{LoggingConfig, MarkerRelationSchema, OneRelRelations, RelationTriple, RexConfig, Vocabularies, Vocabulary};
use rex_extractor::glre::{GlreBatch, GlreExtractor, GlreModel};
use rex_extractor::metrics::{TripleEvaluator, ValidationWriter};
use rex_extractor::onerel::{Tag, TableDecoder, TagCube};
use rex_extractor::plmarker::{FeaturePacker, MarkerDocument, MarkerExampleBuilder};
use rex_extractor::tokenizer::BasicTokenizer;
use rex_extractor::RelationExtractor;
use rex_nn::TransformerEncoder;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Parser)]
#[command(name = "rex")]
#[command(about = "Relation extraction models and dataset tools")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode predicted OneRel tag cubes into triples
    Decode {
        /// JSON lines of `{text, offsets, len, cells}`
        input: PathBuf,
        /// OneRel relation file (`[id2rel, rel2id]`)
        #[arg(long)]
        relations: PathBuf,
        /// Write triples here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Score predicted triples against gold triples
    Evaluate {
        /// JSON lines of `{text, preds, golds}`
        input: PathBuf,
        /// Epoch number used in the validation file name
        #[arg(long, default_value_t = 0)]
        epoch: usize,
    },
    /// Build and pack PLMarker examples
    Plmarker {
        /// Documents, one JSON object per line
        docs: PathBuf,
        /// Relation schema (`{relation, sym, no_sym}`)
        #[arg(long)]
        schema: PathBuf,
        /// Entity type vocabulary
        #[arg(long)]
        types: PathBuf,
        /// Sub-word vocabulary, one token per line
        #[arg(long)]
        vocab: PathBuf,
        /// Add NIL subjects
        #[arg(long)]
        training: bool,
        /// Write packed features here
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run the GLRE model over a batch file
    Glre {
        /// Serialized batch
        batch: PathBuf,
        /// Directory with `ner2id.json` and `rel2id.json`
        #[arg(long)]
        vocab_dir: PathBuf,
        /// Override the configured score threshold
        #[arg(long)]
        threshold: Option<f32>,
        /// Write predictions here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// One line of `rex decode` input
#[derive(Debug, Deserialize)]
struct CubeLine {
    text: String,
    offsets: Vec<(usize, usize)>,
    len: usize,
    /// Non-`A` cells as `[relation, head, tail, tag]`
    cells: Vec<[usize; 4]>,
}

/// One line of `rex evaluate` input
#[derive(Debug, Deserialize)]
struct PredictionLine {
    text: String,
    preds: Vec<RelationTriple>,
    golds: Vec<RelationTriple>,
}

#[derive(Debug, Serialize)]
struct DecodedLine<'a> {
    text: &'a str,
    triples: Vec<RelationTriple>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RexConfig::from_file(path)?,
        None => RexConfig::default(),
    }
    .with_env_override()?;
    config.validate()?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Decode {
            input,
            relations,
            output,
        } => decode(&input, &relations, output.as_deref()),
        Commands::Evaluate { input, epoch } => evaluate(&config, &input, epoch),
        Commands::Plmarker {
            docs,
            schema,
            types,
            vocab,
            training,
            output,
        } => plmarker(&config, &docs, &schema, &types, &vocab, training, output.as_deref()),
        Commands::Glre {
            batch,
            vocab_dir,
            threshold,
            output,
        } => glre(&config, &batch, &vocab_dir, threshold, output.as_deref()),
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("rex_cli={0},rex_extractor={0},rex_graph={0},rex_nn={0}", logging.level).into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location)
        .with_writer(std::io::stderr);
    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_lines<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("{}:{}", path.display(), n + 1))
        })
        .collect()
}

fn write_lines<T: Serialize>(path: Option<&Path>, items: &[T]) -> Result<()> {
    let mut out: Box<dyn Write> = match path {
        Some(path) => Box::new(std::io::BufWriter::new(
            std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout().lock()),
    };
    for item in items {
        writeln!(out, "{}", serde_json::to_string(item)?)?;
    }
    out.flush()?;
    Ok(())
}

fn decode(input: &Path, relations: &Path, output: Option<&Path>) -> Result<()> {
    let relations = Arc::new(OneRelRelations::from_file(relations)?);
    let decoder = TableDecoder::new(relations.clone());
    let lines: Vec<CubeLine> = read_lines(input)?;

    let mut decoded = Vec::with_capacity(lines.len());
    for line in &lines {
        let mut cube = TagCube::new(relations.len(), line.len);
        for &[relation, head, tail, tag] in &line.cells {
            cube.set(relation, head, tail, Tag::from_index(tag))?;
        }
        decoded.push(DecodedLine {
            text: &line.text,
            triples: decoder.decode(&cube, &line.text, &line.offsets),
        });
    }
    info!(lines = decoded.len(), "Decoded tag cubes");
    write_lines(output, &decoded)
}

fn evaluate(config: &RexConfig, input: &Path, epoch: usize) -> Result<()> {
    let lines: Vec<PredictionLine> = read_lines(input)?;
    let mut writer = ValidationWriter::for_epoch(&config.output, epoch)?;
    let mut evaluator = TripleEvaluator::new();
    evaluator.evaluate_all(
        lines
            .iter()
            .map(|l| (l.text.as_str(), l.preds.as_slice(), l.golds.as_slice())),
        &mut writer,
    )?;
    let path = writer.path().to_path_buf();
    let written = writer.finish()?;
    info!(path = %path.display(), written, "Wrote validation output");

    println!("{}", evaluator.finish().report());
    Ok(())
}

fn plmarker(
    config: &RexConfig,
    docs: &Path,
    schema: &Path,
    types: &Path,
    vocab: &Path,
    training: bool,
    output: Option<&Path>,
) -> Result<()> {
    let settings = &config.plmarker;
    let tokenizer = BasicTokenizer::from_vocab_file(vocab, true)?;
    let schema = MarkerRelationSchema::from_file(schema, settings.no_sym)?;
    let types = Vocabulary::from_file(types)?;
    let builder = MarkerExampleBuilder::new(
        Arc::new(tokenizer),
        Arc::new(schema),
        Arc::new(types),
        settings.clone(),
    );

    let documents = MarkerDocument::from_file(docs)?;
    let mut rng = StdRng::seed_from_u64(settings.seed);
    let dataset = builder.build(&documents, training, &mut rng)?;
    let packer = FeaturePacker::new(builder.tokenizer(), settings, builder.type_count());
    let features = packer.pack_all(&dataset.examples)?;

    println!(
        "examples: {} | max objects: {} | longest document: {} sub-words | gold entities: {} | gold relations: {}",
        features.len(),
        dataset.max_objects,
        dataset.max_subwords,
        dataset.gold.ner_total,
        dataset.gold.relation_total,
    );
    if let Some(path) = output {
        write_lines(Some(path), &features)?;
    }
    Ok(())
}

fn glre(config: &RexConfig, batch: &Path, vocab_dir: &Path, threshold: Option<f32>, output: Option<&Path>) -> Result<()> {
    let vocabularies = Vocabularies::load(vocab_dir)?;
    let encoder = TransformerEncoder::new(config.encoder.clone(), config.glre.seed)?;
    let model = GlreModel::new(config.glre.clone(), Arc::new(encoder), vocabularies)?;
    let mut extractor = GlreExtractor::new(model);
    if let Some(threshold) = threshold {
        extractor = extractor.with_threshold(threshold);
    }

    let batch = GlreBatch::from_file(batch)?;
    let predictions = extractor.extract(&batch)?;
    write_lines(output, &predictions)?;

    if batch.has_labels() {
        let evaluation = extractor.model().evaluate(&batch)?;
        eprintln!(
            "pairs: {} | loss: {:.4} | precision: {:.1}% | recall: {:.1}% | F1: {:.1}%",
            evaluation.pairs,
            evaluation.loss,
            evaluation.counts.precision() * 100.0,
            evaluation.counts.recall() * 100.0,
            evaluation.counts.f1_score() * 100.0,
        );
    }
    Ok(())
}
