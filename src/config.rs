//! Model configuration.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use crate::activations::Activation;

/// Hyperparameter bundle, resolved once at model construction and never
/// mutated afterwards.
///
/// The trailing training-schedule fields (`label_smoothing`,
/// `learning_rate`, `train_steps`, `batch_size`) are carried for the
/// surrounding training infrastructure; the model core does not read them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerConfig {
    pub hidden_size: usize,
    pub filter_size: usize,
    pub num_heads: usize,
    pub num_encoder_layers: usize,
    pub num_decoder_layers: usize,

    pub source_vocab_size: usize,
    pub target_vocab_size: usize,

    #[serde(default)]
    pub attention_dropout: f32,
    #[serde(default = "default_residual_dropout")]
    pub residual_dropout: f32,
    #[serde(default)]
    pub relu_dropout: f32,

    #[serde(default)]
    pub shared_source_target_embedding: bool,
    #[serde(default)]
    pub shared_embedding_and_softmax_weights: bool,

    #[serde(default)]
    pub pad_id: u32,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f32,
    #[serde(default)]
    pub activation: Activation,

    #[serde(default = "default_label_smoothing")]
    pub label_smoothing: f32,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    #[serde(default = "default_train_steps")]
    pub train_steps: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_residual_dropout() -> f32 {
    0.1
}

fn default_layer_norm_eps() -> f32 {
    1e-5
}

fn default_label_smoothing() -> f32 {
    0.1
}

fn default_learning_rate() -> f32 {
    7e-4
}

fn default_train_steps() -> usize {
    100_000
}

fn default_batch_size() -> usize {
    4096
}

impl TransformerConfig {
    /// The "base" profile: 512 hidden, 2048 filter, 8 heads, 6+6 layers.
    pub fn base(source_vocab_size: usize, target_vocab_size: usize) -> Self {
        Self {
            hidden_size: 512,
            filter_size: 2048,
            num_heads: 8,
            num_encoder_layers: 6,
            num_decoder_layers: 6,
            source_vocab_size,
            target_vocab_size,
            attention_dropout: 0.0,
            residual_dropout: 0.1,
            relu_dropout: 0.0,
            shared_source_target_embedding: false,
            shared_embedding_and_softmax_weights: false,
            pad_id: 0,
            layer_norm_eps: default_layer_norm_eps(),
            activation: Activation::Relu,
            label_smoothing: 0.1,
            learning_rate: 7e-4,
            train_steps: 100_000,
            batch_size: 4096,
        }
    }

    /// The "big" profile: 1024 hidden, 4096 filter, 16 heads, heavier
    /// residual dropout and a longer schedule.
    pub fn big(source_vocab_size: usize, target_vocab_size: usize) -> Self {
        Self {
            hidden_size: 1024,
            filter_size: 4096,
            num_heads: 16,
            residual_dropout: 0.3,
            learning_rate: 5e-4,
            train_steps: 300_000,
            ..Self::base(source_vocab_size, target_vocab_size)
        }
    }

    /// Rejects configurations the model cannot be built from. Called once
    /// by `Transformer::new`; anything that passes here is assumed valid by
    /// every forward path.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.hidden_size > 0, "hidden_size must be positive");
        ensure!(self.num_heads > 0, "num_heads must be positive");
        ensure!(
            self.hidden_size % self.num_heads == 0,
            "hidden_size {} not divisible by num_heads {}",
            self.hidden_size,
            self.num_heads
        );
        ensure!(self.filter_size > 0, "filter_size must be positive");
        ensure!(
            self.num_encoder_layers > 0 && self.num_decoder_layers > 0,
            "layer counts must be positive"
        );
        ensure!(
            self.source_vocab_size > 0 && self.target_vocab_size > 0,
            "vocabulary sizes must be positive"
        );
        ensure!(
            (self.pad_id as usize) < self.source_vocab_size,
            "pad_id {} outside source vocabulary of size {}",
            self.pad_id,
            self.source_vocab_size
        );

        for (name, rate) in [
            ("attention_dropout", self.attention_dropout),
            ("residual_dropout", self.residual_dropout),
            ("relu_dropout", self.relu_dropout),
        ] {
            ensure!(
                (0.0..1.0).contains(&rate),
                "{} must be in [0, 1), got {}",
                name,
                rate
            );
        }

        if self.shared_source_target_embedding {
            ensure!(
                self.source_vocab_size == self.target_vocab_size,
                "shared source/target embedding requires equal vocabulary sizes ({} vs {})",
                self.source_vocab_size,
                self.target_vocab_size
            );
        }

        Ok(())
    }

    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_heads
    }
}
