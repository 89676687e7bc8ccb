//! Layer normalization.

use ndarray::{Array1, Array3, Axis};

/// Layer normalization over the hidden axis with learnable scale and shift.
pub struct LayerNorm {
    pub weight: Array1<f32>,
    pub bias: Array1<f32>,
    pub eps: f32,
}

impl LayerNorm {
    pub fn new(weight: Array1<f32>, bias: Array1<f32>, eps: f32) -> Self {
        Self { weight, bias, eps }
    }

    /// Identity-at-init normalization: unit scale, zero shift.
    pub fn identity(hidden_size: usize, eps: f32) -> Self {
        Self::new(Array1::ones(hidden_size), Array1::zeros(hidden_size), eps)
    }

    /// Normalizes each position of a `[batch, len, hidden]` tensor
    /// independently.
    pub fn forward(&self, hidden: &Array3<f32>) -> Array3<f32> {
        let mean = hidden.mean_axis(Axis(2)).unwrap().insert_axis(Axis(2));
        let var = hidden.var_axis(Axis(2), 0.0).insert_axis(Axis(2));

        let inv_std = (&var + self.eps).mapv(|x| 1.0 / x.sqrt());
        let normalized = (hidden - &mean) * &inv_std;

        normalized * &self.weight + &self.bias
    }
}
