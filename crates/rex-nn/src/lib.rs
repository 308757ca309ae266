//! REX NN - Neural building blocks on ndarray
//!
//! Forward-only layers shared by the relation-extraction models:
//! linear maps, embeddings, dropout, layer norm, multi-head attention,
//! (Bi)LSTM and a transformer token encoder. Every forward method takes
//! `&self`; randomness comes from a caller-supplied RNG.

pub mod attention;
pub mod layers;
pub mod lstm;
pub mod ops;
pub mod transformer;

pub use attention::MultiHeadAttention;
pub use layers::{xavier_uniform, Dropout, Embedding, LayerNorm, Linear, Mode};
pub use lstm::{BiLstm, Lstm};
pub use transformer::{TokenEncoder, TransformerEncoder};
