//! Additive attention-bias construction.
//!
//! Sequence structure enters the attention computation as additive biases on
//! the pre-softmax scores: 0 where a query may attend, `MASK_VALUE` where it
//! may not. Biases are broadcastable over `[batch, heads, q_len, kv_len]`.

use anyhow::{bail, Result};
use ndarray::{Array2, Array4, Axis};

/// Large finite negative constant used to forbid attention positions.
///
/// A finite value instead of `-inf` keeps softmax well-defined even when a
/// row is entirely masked, at the cost of a vanishing but nonzero weight.
pub const MASK_VALUE: f32 = -1e9;

/// Builds a `[batch, len]` 0/1 mask from token ids: 1.0 for real tokens,
/// 0.0 for padding.
pub fn padding_mask(tokens: &Array2<u32>, pad_id: u32) -> Array2<f32> {
    tokens.mapv(|id| if id == pad_id { 0.0 } else { 1.0 })
}

/// Converts a `[batch, len]` 0/1 mask into an additive bias
/// `[batch, 1, 1, len]`: `MASK_VALUE` at padded key positions, 0 elsewhere.
pub fn padding_bias(mask: &Array2<f32>) -> Array4<f32> {
    mask.mapv(|m| (1.0 - m) * MASK_VALUE)
        .insert_axis(Axis(1))
        .insert_axis(Axis(1))
}

/// Builds the causal bias `[1, 1, length, length]`: `MASK_VALUE` strictly
/// above the diagonal, so position i can attend to positions 0..=i only.
pub fn causal_bias(length: usize) -> Array4<f32> {
    Array4::from_shape_fn((1, 1, length, length), |(_, _, i, j)| {
        if j > i {
            MASK_VALUE
        } else {
            0.0
        }
    })
}

/// Adds a broadcastable bias onto attention scores in place.
pub fn add_bias(scores: &mut Array4<f32>, bias: &Array4<f32>) -> Result<()> {
    if bias.broadcast(scores.dim()).is_none() {
        bail!(
            "attention bias shape {:?} does not broadcast to scores shape {:?}",
            bias.shape(),
            scores.shape()
        );
    }
    *scores += bias;
    Ok(())
}
