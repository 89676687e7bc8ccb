//! Multi-head attention with additive biasing and incremental K/V caching.

use anyhow::{ensure, Result};
use ndarray::{Array1, Array2, Array3, Array4, ArrayView3};
use rand::rngs::StdRng;

use crate::activations::softmax_4d_inplace;
use crate::bias::add_bias;
use crate::cache::AttentionContext;
use crate::dropout::{Dropout, Mode};
use crate::init::{xavier_uniform, zeros_bias};
use crate::linalg::{matmul_3d_2d, matmul_4d};

/// Multi-head scaled-dot-product attention.
///
/// Weights are stored `[in_features, out_features]` for direct matmul
/// against `[batch, len, hidden]` activations.
pub struct MultiHeadAttention {
    pub q_weight: Array2<f32>,
    pub q_bias: Array1<f32>,
    pub k_weight: Array2<f32>,
    pub k_bias: Array1<f32>,
    pub v_weight: Array2<f32>,
    pub v_bias: Array1<f32>,
    pub output_weight: Array2<f32>,
    pub output_bias: Array1<f32>,

    pub num_heads: usize,
    pub head_dim: usize,
    scale: f32,
    attention_dropout: Dropout,
}

impl MultiHeadAttention {
    pub fn init(
        hidden_size: usize,
        num_heads: usize,
        attention_dropout: f32,
        rng: &mut StdRng,
    ) -> Self {
        let head_dim = hidden_size / num_heads;
        Self {
            q_weight: xavier_uniform(hidden_size, hidden_size, rng),
            q_bias: zeros_bias(hidden_size),
            k_weight: xavier_uniform(hidden_size, hidden_size, rng),
            k_bias: zeros_bias(hidden_size),
            v_weight: xavier_uniform(hidden_size, hidden_size, rng),
            v_bias: zeros_bias(hidden_size),
            output_weight: xavier_uniform(hidden_size, hidden_size, rng),
            output_bias: zeros_bias(hidden_size),
            num_heads,
            head_dim,
            scale: 1.0 / (head_dim as f32).sqrt(),
            attention_dropout: Dropout::new(attention_dropout),
        }
    }

    /// Runs attention for the queries derived from `x`.
    ///
    /// `memory` selects the key/value source: `None` is self-attention,
    /// `Some(encoder_output)` is cross-attention. With
    /// `AttentionContext::Incremental` the new step's key/value projections
    /// are appended to the layer cache and attention runs over the grown
    /// cache; cross-attention never caches because the encoder output is
    /// fully available every step.
    pub fn forward(
        &self,
        x: &Array3<f32>,
        bias: Option<&Array4<f32>>,
        memory: Option<&Array3<f32>>,
        ctx: AttentionContext,
        mode: &mut Mode,
    ) -> Result<Array3<f32>> {
        let q = matmul_3d_2d(x, &self.q_weight) + &self.q_bias;
        let kv_source = memory.unwrap_or(x);
        let new_k = matmul_3d_2d(kv_source, &self.k_weight) + &self.k_bias;
        let new_v = matmul_3d_2d(kv_source, &self.v_weight) + &self.v_bias;

        let context = match ctx {
            AttentionContext::Full => {
                self.attend(&q, &new_k.view(), &new_v.view(), bias, mode)?
            }
            AttentionContext::Incremental(cache) => {
                ensure!(
                    memory.is_none(),
                    "cross-attention does not use the incremental cache"
                );
                cache.append(&new_k, &new_v)?;
                self.attend(&q, &cache.keys(), &cache.values(), bias, mode)?
            }
        };

        Ok(matmul_3d_2d(&context, &self.output_weight) + &self.output_bias)
    }

    /// `[batch, len, hidden] -> [batch, heads, len, head_dim]`, contiguous.
    fn split_heads(&self, x: Array3<f32>) -> Result<Array4<f32>> {
        let (batch, len, _) = x.dim();
        let split = x
            .into_shape_with_order((batch, len, self.num_heads, self.head_dim))?
            .permuted_axes([0, 2, 1, 3]);
        Ok(split.as_standard_layout().to_owned())
    }

    fn attend(
        &self,
        q: &Array3<f32>,
        k: &ArrayView3<f32>,
        v: &ArrayView3<f32>,
        bias: Option<&Array4<f32>>,
        mode: &mut Mode,
    ) -> Result<Array3<f32>> {
        let (batch, q_len, _) = q.dim();
        ensure!(
            k.dim() == v.dim(),
            "key/value shapes diverge: {:?} vs {:?}",
            k.shape(),
            v.shape()
        );
        ensure!(
            k.shape()[0] == batch,
            "query batch {} does not match key/value batch {}",
            batch,
            k.shape()[0]
        );

        let q4 = self.split_heads(q.clone())?;
        let k4 = self.split_heads(k.to_owned())?;
        let v4 = self.split_heads(v.to_owned())?;

        let k_t = k4.permuted_axes([0, 1, 3, 2]).as_standard_layout().to_owned();
        let mut scores = matmul_4d(&q4, &k_t);
        scores *= self.scale;

        if let Some(bias) = bias {
            add_bias(&mut scores, bias)?;
        }
        softmax_4d_inplace(&mut scores);
        let probs = self.attention_dropout.forward(scores, mode);

        let context = matmul_4d(&probs, &v4);
        let merged = context
            .permuted_axes([0, 2, 1, 3])
            .as_standard_layout()
            .to_owned()
            .into_shape_with_order((batch, q_len, self.num_heads * self.head_dim))?;
        Ok(merged)
    }
}
