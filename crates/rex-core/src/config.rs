//! REX Configuration Management
//!
//! Model hyper-parameters come from a TOML file, environment variables
//! override a handful of run-level settings, and everything falls back to
//! sensible defaults. The configuration is validated once and then treated
//! as immutable by the model constructors.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RexConfig {
    /// Shared token encoder
    pub encoder: EncoderConfig,

    /// Document-level graph model
    pub glre: GlreConfig,

    /// Table-filling model
    pub onerel: OneRelConfig,

    /// Span-pair marker dataset builder
    pub plmarker: PlMarkerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Evaluation output
    pub output: OutputConfig,
}

impl RexConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_override()
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply every `REX_*` variable that `lookup` returns, whatever its value
    fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(level) = lookup("REX_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("REX_LOG_JSON") {
            self.logging.json_format = parse_bool("REX_LOG_JSON", &json)?;
        }
        if let Some(path) = lookup("REX_OUTPUT_PATH") {
            self.output.output_path = PathBuf::from(path);
        }
        if let Some(seed) = lookup("REX_SEED") {
            let seed: u64 = seed.parse().map_err(|_| ConfigError::InvalidValue {
                key: "REX_SEED".to_string(),
                value: seed,
            })?;
            self.glre.seed = seed;
            self.onerel.seed = seed;
            self.plmarker.seed = seed;
        }
        if let Some(dataset) = lookup("REX_DATASET") {
            self.glre.dataset = dataset.parse()?;
        }
        if let Some(query) = lookup("REX_QUERY") {
            self.glre.query = query.parse()?;
        }

        Ok(self)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.encoder.validate()?;
        self.glre.validate()?;
        self.onerel.validate()?;
        self.plmarker.validate()?;
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn check_dropout(key: &str, p: f32) -> Result<(), ConfigError> {
    if (0.0..1.0).contains(&p) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: p.to_string(),
        })
    }
}

/// Transformer token encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Sub-word vocabulary size
    pub vocab_size: usize,

    /// Hidden size of every encoder layer
    pub hidden_size: usize,

    /// Number of transformer blocks
    pub num_layers: usize,

    /// Attention heads per block
    pub num_heads: usize,

    /// Feed-forward inner size
    pub intermediate_size: usize,

    /// Maximum sequence length (position table size)
    pub max_positions: usize,

    /// Layer norm epsilon
    pub layer_norm_eps: f32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            vocab_size: 30522,
            hidden_size: 256,
            num_layers: 2,
            num_heads: 4,
            intermediate_size: 1024,
            max_positions: 512,
            layer_norm_eps: 1e-12,
        }
    }
}

impl EncoderConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.num_heads == 0 || self.hidden_size % self.num_heads != 0 {
            return Err(ConfigError::Incompatible(format!(
                "encoder hidden_size {} is not divisible by num_heads {}",
                self.hidden_size, self.num_heads
            )));
        }
        if self.vocab_size == 0 || self.max_positions == 0 {
            return Err(ConfigError::MissingRequired(
                "encoder vocab_size and max_positions".to_string(),
            ));
        }
        Ok(())
    }
}

/// How the local representation layer builds its entity queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Pre-graph entity embedding
    #[default]
    Init,
    /// Graph-refined entity embedding
    Global,
}

impl std::str::FromStr for QueryMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "init" => Ok(Self::Init),
            "global" => Ok(Self::Global),
            _ => Err(ConfigError::InvalidValue {
                key: "query".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Dataset family, which decides the pair-selection rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    /// Any ordered pair of distinct entities
    #[default]
    DocRed,
    /// Chemical-disease pairs only
    Cdr,
}

impl std::str::FromStr for DatasetKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docred" => Ok(Self::DocRed),
            "cdr" => Ok(Self::Cdr),
            _ => Err(ConfigError::InvalidValue {
                key: "dataset".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Pooling used to merge words into mentions and mentions into entities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    #[default]
    Mean,
    Max,
}

/// GLRE model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlreConfig {
    /// Width of projected word vectors (and of mention/entity/sentence nodes)
    pub lstm_dim: usize,

    /// Run a BiLSTM over encoder word vectors before projection
    pub bilstm: bool,

    /// Stacked BiLSTM layers
    pub bilstm_layers: usize,

    /// Dropout between BiLSTM layers
    pub drop_i: f32,

    /// Concatenate a node-type embedding to every node
    pub types: bool,

    /// Node-type embedding width
    pub type_dim: usize,

    /// Word/mention pooling
    pub pooling: Pooling,

    /// RGCN hidden width
    pub rgcn_hidden_dim: usize,

    /// RGCN layers (0 disables the graph)
    pub rgcn_num_layers: usize,

    /// Edge types in the adjacency stack
    pub relation_count: usize,

    /// Dropout on RGCN input
    pub gcn_in_drop: f32,

    /// Dropout between RGCN layers
    pub gcn_out_drop: f32,

    /// Use mention-level attention pair representations
    pub local_rep: bool,

    /// Use graph-refined entity pair representations
    pub global_rep: bool,

    /// Query source for the local representation layer
    pub query: QueryMode,

    /// Attention heads in the local representation layer
    pub att_head_num: usize,

    /// Attention dropout
    pub att_dropout: f32,

    /// Append directed sentence-distance embeddings
    pub finaldist: bool,

    /// Distance embedding width
    pub dist_dim: usize,

    /// Self-attention over the pairs of a document
    pub context_att: bool,

    /// Hidden MLP layers before the classifier (0 disables the MLP)
    pub mlp_layers: usize,

    /// MLP width
    pub mlp_dim: usize,

    /// Dropout before the classifier
    pub drop_o: f32,

    /// Relation vocabulary size (including NA)
    pub rel_size: usize,

    /// Index of the "no relation" class
    pub na_index: usize,

    /// Pair-selection rule
    pub dataset: DatasetKind,

    /// Head semantic type for CDR selection
    pub cdr_head_type: String,

    /// Tail semantic type for CDR selection
    pub cdr_tail_type: String,

    /// Sigmoid threshold for emitting a relation
    pub threshold: f32,

    /// Parameter initialisation seed
    pub seed: u64,
}

impl Default for GlreConfig {
    fn default() -> Self {
        Self {
            lstm_dim: 128,
            bilstm: false,
            bilstm_layers: 1,
            drop_i: 0.5,
            types: true,
            type_dim: 20,
            pooling: Pooling::Mean,
            rgcn_hidden_dim: 128,
            rgcn_num_layers: 2,
            relation_count: 5,
            gcn_in_drop: 0.2,
            gcn_out_drop: 0.2,
            local_rep: true,
            global_rep: true,
            query: QueryMode::Init,
            att_head_num: 2,
            att_dropout: 0.0,
            finaldist: true,
            dist_dim: 20,
            context_att: false,
            mlp_layers: 1,
            mlp_dim: 256,
            drop_o: 0.3,
            rel_size: 97,
            na_index: 0,
            dataset: DatasetKind::DocRed,
            cdr_head_type: "Chemical".to_string(),
            cdr_tail_type: "Disease".to_string(),
            threshold: 0.5,
            seed: 42,
        }
    }
}

impl GlreConfig {
    /// Check the feature and layer settings of this section alone
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.local_rep && !self.global_rep {
            return Err(ConfigError::Incompatible(
                "at least one of local_rep and global_rep must be enabled".to_string(),
            ));
        }
        if self.local_rep && (self.att_head_num == 0 || self.lstm_dim % self.att_head_num != 0)
        {
            return Err(ConfigError::Incompatible(format!(
                "lstm_dim {} is not divisible by att_head_num {}",
                self.lstm_dim, self.att_head_num
            )));
        }
        if self.bilstm && self.bilstm_layers == 0 {
            return Err(ConfigError::MissingRequired("bilstm_layers".to_string()));
        }
        if self.rel_size == 0 {
            return Err(ConfigError::MissingRequired("rel_size".to_string()));
        }
        if self.na_index >= self.rel_size {
            return Err(ConfigError::InvalidValue {
                key: "na_index".to_string(),
                value: self.na_index.to_string(),
            });
        }
        if self.relation_count == 0 {
            return Err(ConfigError::MissingRequired("relation_count".to_string()));
        }
        check_dropout("drop_i", self.drop_i)?;
        check_dropout("gcn_in_drop", self.gcn_in_drop)?;
        check_dropout("gcn_out_drop", self.gcn_out_drop)?;
        check_dropout("att_dropout", self.att_dropout)?;
        check_dropout("drop_o", self.drop_o)?;
        Ok(())
    }
}

/// OneRel model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OneRelConfig {
    /// Number of relations in the tag cube
    pub relation_number: usize,

    /// Dropout on encoder output
    pub dropout_prob: f32,

    /// Dropout on projected token pairs
    pub entity_pair_dropout: f32,

    /// Maximum sequence length including special tokens
    pub max_len: usize,

    /// Parameter initialisation seed
    pub seed: u64,
}

impl Default for OneRelConfig {
    fn default() -> Self {
        Self {
            relation_number: 24,
            dropout_prob: 0.2,
            entity_pair_dropout: 0.1,
            max_len: 512,
            seed: 42,
        }
    }
}

impl OneRelConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.relation_number == 0 {
            return Err(ConfigError::MissingRequired("relation_number".to_string()));
        }
        if self.max_len < 2 {
            return Err(ConfigError::InvalidValue {
                key: "max_len".to_string(),
                value: self.max_len.to_string(),
            });
        }
        check_dropout("dropout_prob", self.dropout_prob)?;
        check_dropout("entity_pair_dropout", self.entity_pair_dropout)?;
        Ok(())
    }
}

/// PLMarker dataset builder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlMarkerConfig {
    /// Sequence budget for the sentence window (markers included)
    pub max_seq_length: usize,

    /// Objects packed per example
    pub max_pair_length: usize,

    /// Use typed `[unusedN]` markers instead of `[unused0]`/`[unused1]`
    pub use_typemarker: bool,

    /// Treat only `no_sym` labels as symmetric
    pub no_sym: bool,

    /// Skip the subject itself when enumerating objects
    pub skip_self_pairs: bool,

    /// Use ALBERT pair-marker ids
    pub albert_markers: bool,

    /// Shuffle objects before chunking
    pub shuffle: bool,

    /// Seed for object shuffling
    pub seed: u64,

    /// Let left pair markers attend to each other
    pub att_left: bool,

    /// Let right pair markers attend to each other
    pub att_right: bool,
}

impl Default for PlMarkerConfig {
    fn default() -> Self {
        Self {
            max_seq_length: 256,
            max_pair_length: 16,
            use_typemarker: false,
            no_sym: false,
            skip_self_pairs: false,
            albert_markers: false,
            shuffle: false,
            seed: 42,
            att_left: false,
            att_right: false,
        }
    }
}

impl PlMarkerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_seq_length <= 4 {
            return Err(ConfigError::InvalidValue {
                key: "max_seq_length".to_string(),
                value: self.max_seq_length.to_string(),
            });
        }
        if self.max_pair_length == 0 {
            return Err(ConfigError::MissingRequired("max_pair_length".to_string()));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Evaluation output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root directory for validation dumps
    pub output_path: PathBuf,

    /// Sub-directory per model
    pub model_type: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("output"),
            model_type: "onerel".to_string(),
        }
    }
}

impl OutputConfig {
    /// Path of the validation dump for `epoch`
    pub fn validation_file(&self, epoch: usize) -> PathBuf {
        self.output_path
            .join(&self.model_type)
            .join(format!("val_output_{epoch}.json"))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Incompatible settings: {0}")]
    Incompatible(String),
}
