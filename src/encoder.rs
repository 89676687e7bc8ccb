//! Encoder stack.

use anyhow::Result;
use ndarray::{Array3, Array4};
use rand::rngs::StdRng;

use crate::cache::AttentionContext;
use crate::config::TransformerConfig;
use crate::dropout::Mode;
use crate::sublayer::{AttentionSubLayer, FfnSubLayer};

/// One encoder layer: bidirectional self-attention followed by the
/// feed-forward block, each with its own residual/layer-norm wrapper.
pub struct EncoderLayer {
    pub self_attention: AttentionSubLayer,
    pub feed_forward: FfnSubLayer,
}

impl EncoderLayer {
    pub fn init(config: &TransformerConfig, rng: &mut StdRng) -> Self {
        Self {
            self_attention: AttentionSubLayer::init(config, rng),
            feed_forward: FfnSubLayer::init(config, rng),
        }
    }

    pub fn forward(
        &self,
        x: &Array3<f32>,
        bias: &Array4<f32>,
        mode: &mut Mode,
    ) -> Result<Array3<f32>> {
        let x = self
            .self_attention
            .forward(x, Some(bias), None, AttentionContext::Full, mode)?;
        Ok(self.feed_forward.forward(&x, mode))
    }
}

pub struct Encoder {
    pub layers: Vec<EncoderLayer>,
}

impl Encoder {
    pub fn init(config: &TransformerConfig, rng: &mut StdRng) -> Self {
        let layers = (0..config.num_encoder_layers)
            .map(|_| EncoderLayer::init(config, rng))
            .collect();
        Self { layers }
    }

    /// Runs the layer stack in order over `[batch, src_len, hidden]` input
    /// with the source padding bias applied in every layer.
    pub fn forward(
        &self,
        x: Array3<f32>,
        bias: &Array4<f32>,
        mode: &mut Mode,
    ) -> Result<Array3<f32>> {
        let mut hidden = x;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, bias, mode)?;
        }
        Ok(hidden)
    }
}
