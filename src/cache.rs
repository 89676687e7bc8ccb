//! Key/value cache for incremental decoding.
//!
//! One decoding session owns one `DecoderState`: the encoder output and its
//! padding bias (computed once per source sequence) plus one append-only
//! key/value cache per decoder layer. Sessions never share state; discarding
//! the state ends the session.

use anyhow::{bail, ensure, Result};
use ndarray::{concatenate, Array3, Array4, ArrayView3, Axis};

/// How an attention call interacts with the per-layer cache.
///
/// `Full` computes attention over the whole key/value set (training, encoder
/// self-attention, cross-attention). `Incremental` appends the new step's
/// keys/values to the layer cache and attends over the grown cache.
pub enum AttentionContext<'a> {
    Full,
    Incremental(&'a mut LayerKvCache),
}

/// Grow-only key/value store for one decoder layer,
/// shaped `[batch, steps, hidden]` with zero steps at creation.
#[derive(Debug, Clone)]
pub struct LayerKvCache {
    k: Array3<f32>,
    v: Array3<f32>,
}

impl LayerKvCache {
    pub fn empty(batch_size: usize, hidden_size: usize) -> Self {
        Self {
            k: Array3::zeros((batch_size, 0, hidden_size)),
            v: Array3::zeros((batch_size, 0, hidden_size)),
        }
    }

    /// Accumulated step count. Keys and values always agree.
    pub fn len(&self) -> usize {
        self.k.shape()[1]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> ArrayView3<'_, f32> {
        self.k.view()
    }

    pub fn values(&self) -> ArrayView3<'_, f32> {
        self.v.view()
    }

    /// Appends the new step's key/value projections along the step axis.
    pub fn append(&mut self, new_k: &Array3<f32>, new_v: &Array3<f32>) -> Result<()> {
        ensure!(
            new_k.dim() == new_v.dim(),
            "key/value shapes diverge: {:?} vs {:?}",
            new_k.shape(),
            new_v.shape()
        );
        ensure!(
            new_k.shape()[0] == self.k.shape()[0] && new_k.shape()[2] == self.k.shape()[2],
            "cache append shape {:?} incompatible with cache {:?}",
            new_k.shape(),
            self.k.shape()
        );

        self.k = concatenate(Axis(1), &[self.k.view(), new_k.view()])?;
        self.v = concatenate(Axis(1), &[self.v.view(), new_v.view()])?;
        Ok(())
    }
}

/// Per-session decoding state: one cache slot per decoder layer, addressed
/// by layer index, plus the encoder output and bias once `encode` has run.
pub struct DecoderState {
    layers: Vec<LayerKvCache>,
    encoder_output: Option<Array3<f32>>,
    encoder_bias: Option<Array4<f32>>,
    batch_size: usize,
}

impl DecoderState {
    pub fn new(num_layers: usize, batch_size: usize, hidden_size: usize) -> Self {
        let layers = (0..num_layers)
            .map(|_| LayerKvCache::empty(batch_size, hidden_size))
            .collect();
        Self {
            layers,
            encoder_output: None,
            encoder_bias: None,
            batch_size,
        }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Accumulated decode steps (identical for every layer by construction).
    pub fn step_count(&self) -> usize {
        self.layers.first().map(LayerKvCache::len).unwrap_or(0)
    }

    /// True once `encode` has stored the source-side results.
    pub fn is_encoded(&self) -> bool {
        self.encoder_output.is_some()
    }

    pub fn set_encoder_output(&mut self, output: Array3<f32>, bias: Array4<f32>) {
        self.encoder_output = Some(output);
        self.encoder_bias = Some(bias);
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut LayerKvCache> {
        self.layers.get_mut(index)
    }

    /// Splits the state into the (immutable) encoder results and the mutable
    /// per-layer cache slots for a decode call.
    pub fn decode_parts_mut(
        &mut self,
    ) -> Result<(&Array3<f32>, &Array4<f32>, &mut [LayerKvCache])> {
        let output = match self.encoder_output.as_ref() {
            Some(output) => output,
            None => bail!("decode called before encode: state has no encoder output"),
        };
        let bias = match self.encoder_bias.as_ref() {
            Some(bias) => bias,
            None => bail!("decode called before encode: state has no encoder bias"),
        };
        Ok((output, bias, &mut self.layers))
    }
}
