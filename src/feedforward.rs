//! Position-wise feed-forward network.

use ndarray::{Array1, Array2, Array3};
use rand::rngs::StdRng;

use crate::activations::{apply_activation, Activation};
use crate::dropout::{Dropout, Mode};
use crate::init::{xavier_uniform, zeros_bias};
use crate::linalg::matmul_3d_2d;

/// Two-layer MLP applied independently at every position: expand to the
/// filter size, activate, contract back to the hidden size.
pub struct FeedForward {
    pub w1: Array2<f32>,
    pub b1: Array1<f32>,
    pub w2: Array2<f32>,
    pub b2: Array1<f32>,

    activation: Activation,
    relu_dropout: Dropout,
}

impl FeedForward {
    pub fn init(
        hidden_size: usize,
        filter_size: usize,
        activation: Activation,
        relu_dropout: f32,
        rng: &mut StdRng,
    ) -> Self {
        Self {
            w1: xavier_uniform(hidden_size, filter_size, rng),
            b1: zeros_bias(filter_size),
            w2: xavier_uniform(filter_size, hidden_size, rng),
            b2: zeros_bias(hidden_size),
            activation,
            relu_dropout: Dropout::new(relu_dropout),
        }
    }

    pub fn forward(&self, x: &Array3<f32>, mode: &mut Mode) -> Array3<f32> {
        let mut inner = matmul_3d_2d(x, &self.w1) + &self.b1;
        apply_activation(&mut inner, self.activation);
        let inner = self.relu_dropout.forward(inner, mode);
        matmul_3d_2d(&inner, &self.w2) + &self.b2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_output_shape_matches_input() {
        let mut rng = StdRng::seed_from_u64(3);
        let ffn = FeedForward::init(4, 16, Activation::Relu, 0.0, &mut rng);
        let x = Array3::from_shape_fn((2, 3, 4), |(b, s, h)| (b + s + h) as f32 * 0.1);
        let out = ffn.forward(&x, &mut Mode::infer());
        assert_eq!(out.shape(), &[2, 3, 4]);
    }

    #[test]
    fn test_positions_transform_independently() {
        let mut rng = StdRng::seed_from_u64(3);
        let ffn = FeedForward::init(4, 8, Activation::Relu, 0.0, &mut rng);

        let x = Array3::from_shape_fn((1, 2, 4), |(_, s, h)| (s * 4 + h) as f32 * 0.25);
        let full = ffn.forward(&x, &mut Mode::infer());

        // Running a single position alone gives the same row.
        let row = x.slice(ndarray::s![.., 1..2, ..]).to_owned();
        let alone = ffn.forward(&row, &mut Mode::infer());
        for h in 0..4 {
            assert!((alone[[0, 0, h]] - full[[0, 1, h]]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_relu_clips_negative_inner_activations() {
        // Hand-built weights: w1 negates the input, so the inner layer is
        // all-negative for positive input and relu zeroes it.
        let w1 = Array2::from_shape_fn((2, 2), |(i, j)| if i == j { -1.0 } else { 0.0 });
        let w2 = Array2::from_shape_fn((2, 2), |(i, j)| if i == j { 1.0 } else { 0.0 });
        let ffn = FeedForward {
            w1,
            b1: Array1::zeros(2),
            w2,
            b2: Array1::from_vec(vec![0.5, -0.5]),
            activation: Activation::Relu,
            relu_dropout: Dropout::new(0.0),
        };

        let x = Array3::from_elem((1, 1, 2), 3.0);
        let out = ffn.forward(&x, &mut Mode::infer());
        assert_eq!(out[[0, 0, 0]], 0.5);
        assert_eq!(out[[0, 0, 1]], -0.5);
    }
}
