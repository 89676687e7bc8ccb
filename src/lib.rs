//! Encoder-decoder transformer core for sequence-to-sequence transduction.
//!
//! This crate provides the layered encoder/decoder architecture used for
//! tasks such as machine translation: attention and feed-forward sublayers
//! with residual + layer-norm wiring, additive attention biases for padding
//! and causal masking, and an incremental decoding state that caches
//! per-layer key/value projections so generation runs one token per step
//! without recomputing the prefix.
//!
//! Tokenization, decoding loops (beam/greedy search), optimizers and
//! checkpointing live outside this crate.

pub mod activations;
pub mod attention;
pub mod bias;
pub mod cache;
pub mod config;
pub mod decoder;
pub mod dropout;
pub mod embeddings;
pub mod encoder;
pub mod feedforward;
pub mod init;
pub mod linalg;
pub mod model;
pub mod normalization;
pub mod positional;
pub mod sublayer;

// Re-export commonly used items
pub use crate::{
    attention::MultiHeadAttention,
    bias::MASK_VALUE,
    cache::{AttentionContext, DecoderState, LayerKvCache},
    config::TransformerConfig,
    decoder::{Decoder, DecoderLayer},
    dropout::{Dropout, Mode},
    embeddings::EmbeddingTable,
    encoder::{Encoder, EncoderLayer},
    feedforward::FeedForward,
    model::{TrainingBatch, Transformer},
    normalization::LayerNorm,
};

// Prelude for easy imports
pub mod prelude {
    pub use crate::cache::{AttentionContext, DecoderState, LayerKvCache};
    pub use crate::config::TransformerConfig;
    pub use crate::dropout::Mode;
    pub use crate::model::{TrainingBatch, Transformer};
}

#[cfg(test)]
mod tests;
