//! Residual sublayer wiring: `layer_norm(x + dropout(f(x)))`.

use anyhow::Result;
use ndarray::{Array3, Array4};
use rand::rngs::StdRng;

use crate::attention::MultiHeadAttention;
use crate::cache::AttentionContext;
use crate::config::TransformerConfig;
use crate::dropout::{Dropout, Mode};
use crate::feedforward::FeedForward;
use crate::normalization::LayerNorm;

/// An attention block wrapped in the residual/dropout/layer-norm pattern.
pub struct AttentionSubLayer {
    pub attention: MultiHeadAttention,
    pub layer_norm: LayerNorm,
    residual_dropout: Dropout,
}

impl AttentionSubLayer {
    pub fn init(config: &TransformerConfig, rng: &mut StdRng) -> Self {
        Self {
            attention: MultiHeadAttention::init(
                config.hidden_size,
                config.num_heads,
                config.attention_dropout,
                rng,
            ),
            layer_norm: LayerNorm::identity(config.hidden_size, config.layer_norm_eps),
            residual_dropout: Dropout::new(config.residual_dropout),
        }
    }

    pub fn forward(
        &self,
        x: &Array3<f32>,
        bias: Option<&Array4<f32>>,
        memory: Option<&Array3<f32>>,
        ctx: AttentionContext,
        mode: &mut Mode,
    ) -> Result<Array3<f32>> {
        let y = self.attention.forward(x, bias, memory, ctx, mode)?;
        let y = self.residual_dropout.forward(y, mode);
        Ok(self.layer_norm.forward(&(x + &y)))
    }
}

/// A feed-forward block wrapped in the same residual pattern.
pub struct FfnSubLayer {
    pub feed_forward: FeedForward,
    pub layer_norm: LayerNorm,
    residual_dropout: Dropout,
}

impl FfnSubLayer {
    pub fn init(config: &TransformerConfig, rng: &mut StdRng) -> Self {
        Self {
            feed_forward: FeedForward::init(
                config.hidden_size,
                config.filter_size,
                config.activation,
                config.relu_dropout,
                rng,
            ),
            layer_norm: LayerNorm::identity(config.hidden_size, config.layer_norm_eps),
            residual_dropout: Dropout::new(config.residual_dropout),
        }
    }

    pub fn forward(&self, x: &Array3<f32>, mode: &mut Mode) -> Array3<f32> {
        let y = self.feed_forward.forward(x, mode);
        let y = self.residual_dropout.forward(y, mode);
        self.layer_norm.forward(&(x + &y))
    }
}
