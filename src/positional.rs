//! Sinusoidal positional encoding.

use ndarray::{Array2, Array3};

/// Builds the `[len, dim]` sinusoidal table: interleaved sin/cos with
/// geometrically spaced wavelengths. A trailing odd column stays zero.
pub fn sinusoid_table(len: usize, dim: usize) -> Array2<f32> {
    let mut table = Array2::<f32>::zeros((len, dim));

    for pos in 0..len {
        for i in 0..dim / 2 {
            let angle = pos as f32 / 10000_f32.powf(2.0 * i as f32 / dim as f32);
            table[[pos, 2 * i]] = angle.sin();
            table[[pos, 2 * i + 1]] = angle.cos();
        }
    }

    table
}

/// Adds the position signal to a `[batch, len, hidden]` tensor in place.
/// Positions always count from 0: single-step decoding slices the encoded
/// sequence afterwards rather than offsetting the signal.
pub fn encode_positions(x: &mut Array3<f32>) {
    let (_, len, hidden) = x.dim();
    let signal = sinusoid_table(len, hidden);
    *x += &signal;
}
