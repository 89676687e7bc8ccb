//! Activation functions and the attention softmax.

use ndarray::{Array3, Array4, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Minimum array size for parallel execution.
pub const PARALLEL_THRESHOLD: usize = 16_384;

const SQRT_2_OVER_PI: f32 = 0.7978845608;
const GELU_COEFF: f32 = 0.044715;

/// Supported feed-forward activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Gelu,
}

impl Default for Activation {
    fn default() -> Self {
        Activation::Relu
    }
}

#[inline(always)]
pub fn relu_scalar(x: f32) -> f32 {
    x.max(0.0)
}

#[inline(always)]
pub fn gelu_scalar(x: f32) -> f32 {
    let inner = SQRT_2_OVER_PI * (x + GELU_COEFF * x * x * x);
    0.5 * x * (1.0 + inner.tanh())
}

/// Applies the activation in-place to a 3D tensor.
pub fn apply_activation(arr: &mut Array3<f32>, activation: Activation) {
    let use_parallel = arr.len() >= PARALLEL_THRESHOLD;
    match (activation, use_parallel) {
        (Activation::Relu, true) => arr.par_mapv_inplace(relu_scalar),
        (Activation::Relu, false) => arr.mapv_inplace(relu_scalar),
        (Activation::Gelu, true) => arr.par_mapv_inplace(gelu_scalar),
        (Activation::Gelu, false) => arr.mapv_inplace(gelu_scalar),
    }
}

/// Applies softmax in-place to a slice.
pub fn softmax_inplace(slice: &mut [f32]) {
    if slice.is_empty() {
        return;
    }

    let max = slice.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));

    let mut sum = 0.0;
    for v in slice.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }

    if sum > 0.0 {
        let scale = 1.0 / sum;
        for v in slice.iter_mut() {
            *v *= scale;
        }
    }
}

/// Softmax over the key axis of an attention-score tensor
/// `[batch, heads, q_len, kv_len]`.
pub fn softmax_4d_inplace(scores: &mut Array4<f32>) {
    if scores.len() >= PARALLEL_THRESHOLD {
        Zip::from(scores.lanes_mut(Axis(3))).par_for_each(|mut lane| {
            if let Some(slice) = lane.as_slice_mut() {
                softmax_inplace(slice);
            } else {
                softmax_lane_fallback(&mut lane);
            }
        });
    } else {
        Zip::from(scores.lanes_mut(Axis(3))).for_each(|mut lane| {
            if let Some(slice) = lane.as_slice_mut() {
                softmax_inplace(slice);
            } else {
                softmax_lane_fallback(&mut lane);
            }
        });
    }
}

fn softmax_lane_fallback(lane: &mut ndarray::ArrayViewMut1<f32>) {
    let max = lane.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    lane.mapv_inplace(|x| (x - max).exp());
    let sum = lane.sum();
    if sum > 0.0 {
        lane.mapv_inplace(|x| x / sum);
    }
}
