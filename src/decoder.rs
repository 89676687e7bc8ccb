//! Decoder stack with optional incremental K/V caching.

use anyhow::{ensure, Result};
use ndarray::{Array3, Array4};
use rand::rngs::StdRng;

use crate::cache::{AttentionContext, LayerKvCache};
use crate::config::TransformerConfig;
use crate::dropout::Mode;
use crate::sublayer::{AttentionSubLayer, FfnSubLayer};

/// One decoder layer: causal self-attention, cross-attention over the
/// encoder output, then the feed-forward block.
pub struct DecoderLayer {
    pub self_attention: AttentionSubLayer,
    pub cross_attention: AttentionSubLayer,
    pub feed_forward: FfnSubLayer,
}

impl DecoderLayer {
    pub fn init(config: &TransformerConfig, rng: &mut StdRng) -> Self {
        Self {
            self_attention: AttentionSubLayer::init(config, rng),
            cross_attention: AttentionSubLayer::init(config, rng),
            feed_forward: FfnSubLayer::init(config, rng),
        }
    }

    /// With `cache: Some(..)` self-attention runs incrementally over the
    /// grown cache; cross-attention always runs in full over `memory`.
    pub fn forward(
        &self,
        x: &Array3<f32>,
        self_bias: &Array4<f32>,
        cross_bias: &Array4<f32>,
        memory: &Array3<f32>,
        cache: Option<&mut LayerKvCache>,
        mode: &mut Mode,
    ) -> Result<Array3<f32>> {
        let self_ctx = match cache {
            Some(cache) => AttentionContext::Incremental(cache),
            None => AttentionContext::Full,
        };
        let x = self
            .self_attention
            .forward(x, Some(self_bias), None, self_ctx, mode)?;
        let x = self.cross_attention.forward(
            &x,
            Some(cross_bias),
            Some(memory),
            AttentionContext::Full,
            mode,
        )?;
        Ok(self.feed_forward.forward(&x, mode))
    }
}

pub struct Decoder {
    pub layers: Vec<DecoderLayer>,
}

impl Decoder {
    pub fn init(config: &TransformerConfig, rng: &mut StdRng) -> Self {
        let layers = (0..config.num_decoder_layers)
            .map(|_| DecoderLayer::init(config, rng))
            .collect();
        Self { layers }
    }

    /// Runs the layer stack in order. `caches` must hold exactly one cache
    /// per layer when present; cache `i` always belongs to layer `i`.
    pub fn forward(
        &self,
        x: Array3<f32>,
        self_bias: &Array4<f32>,
        cross_bias: &Array4<f32>,
        memory: &Array3<f32>,
        caches: Option<&mut [LayerKvCache]>,
        mode: &mut Mode,
    ) -> Result<Array3<f32>> {
        let mut hidden = x;
        match caches {
            Some(caches) => {
                ensure!(
                    caches.len() == self.layers.len(),
                    "decoder state has {} layer caches but the decoder has {} layers",
                    caches.len(),
                    self.layers.len()
                );
                for (layer, cache) in self.layers.iter().zip(caches.iter_mut()) {
                    hidden =
                        layer.forward(&hidden, self_bias, cross_bias, memory, Some(cache), mode)?;
                }
            }
            None => {
                for layer in &self.layers {
                    hidden = layer.forward(&hidden, self_bias, cross_bias, memory, None, mode)?;
                }
            }
        }
        Ok(hidden)
    }
}
