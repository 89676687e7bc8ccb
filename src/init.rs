//! Weight initialization helpers.

use ndarray::{Array1, Array2};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;

/// Xavier-uniform initialization for a `[in_dim, out_dim]` projection.
pub fn xavier_uniform(in_dim: usize, out_dim: usize, rng: &mut StdRng) -> Array2<f32> {
    let limit = (6.0 / (in_dim + out_dim) as f32).sqrt();
    Array2::random_using((in_dim, out_dim), Uniform::new(-limit, limit), rng)
}

/// Zero-initialized bias vector.
pub fn zeros_bias(dim: usize) -> Array1<f32> {
    Array1::zeros(dim)
}
