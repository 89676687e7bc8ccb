//! Matrix-multiply helpers shared by the attention and feed-forward layers.
//!
//! The 2-D kernels delegate to `faer`; the batched wrappers flatten or
//! iterate the leading axes so callers can stay in `ndarray` shapes.

use faer::Parallelism;
use ndarray::{Array2, Array3, Array4, ArrayView2, Zip};

/// C = A · B for row-major `[m, k] x [k, n]` inputs.
#[inline]
pub fn matmul_2d(a: &ArrayView2<f32>, b: &ArrayView2<f32>) -> Array2<f32> {
    let (m, k) = a.dim();
    let (k2, n) = b.dim();
    assert_eq!(k, k2, "matmul inner dimensions do not match");

    let mut c = Array2::<f32>::zeros((m, n));
    let a_s = a.as_standard_layout();
    let b_s = b.as_standard_layout();
    let c_sl = c.as_slice_mut().expect("output buffer must be contiguous");

    faer::linalg::matmul::matmul(
        faer::mat::from_row_major_slice_mut(c_sl, m, n),
        faer::mat::from_row_major_slice(a_s.as_slice().unwrap(), m, k),
        faer::mat::from_row_major_slice(b_s.as_slice().unwrap(), k, n),
        None,
        1.0,
        Parallelism::Rayon(0),
    );
    c
}

/// C = A · Bᵀ where B is stored `[n, k]`. Used for the vocabulary
/// projection, whose table is laid out `[vocab, hidden]`.
#[inline]
pub fn matmul_2d_transposed(a: &ArrayView2<f32>, b_transposed: &ArrayView2<f32>) -> Array2<f32> {
    let (m, k) = a.dim();
    let (n, k2) = b_transposed.dim();
    assert_eq!(k, k2, "matmul inner dimensions do not match");

    let mut c = Array2::<f32>::zeros((m, n));
    let a_s = a.as_standard_layout();
    let b_s = b_transposed.as_standard_layout();
    let c_sl = c.as_slice_mut().expect("output buffer must be contiguous");

    faer::linalg::matmul::matmul(
        faer::mat::from_row_major_slice_mut(c_sl, m, n),
        faer::mat::from_row_major_slice(a_s.as_slice().unwrap(), m, k),
        faer::mat::from_row_major_slice(b_s.as_slice().unwrap(), n, k).transpose(),
        None,
        1.0,
        Parallelism::Rayon(0),
    );
    c
}

/// Applies a `[k, n]` weight matrix to every position of a `[batch, m, k]`
/// activation tensor.
#[inline]
pub fn matmul_3d_2d(a: &Array3<f32>, b: &Array2<f32>) -> Array3<f32> {
    let (batch, m, k) = a.dim();
    let (k2, n) = b.dim();
    assert_eq!(k, k2, "matmul inner dimensions do not match");

    let a_flat = a.view().into_shape_with_order((batch * m, k)).unwrap();
    let c_flat = matmul_2d(&a_flat, &b.view());
    c_flat.into_shape_with_order((batch, m, n)).unwrap()
}

/// Per-(batch, head) matmul for `[b, h, m, k] x [b, h, k, n]` tensors.
/// Batch entries run on the rayon pool; the inner multiply is serial.
#[inline]
pub fn matmul_4d(a: &Array4<f32>, b: &Array4<f32>) -> Array4<f32> {
    let (batch, heads, m, k) = a.dim();
    let n = b.shape()[3];

    let mut out = Array4::<f32>::zeros((batch, heads, m, n));

    Zip::from(out.outer_iter_mut())
        .and(a.outer_iter())
        .and(b.outer_iter())
        .par_for_each(|mut out_b, a_b, b_b| {
            Zip::from(out_b.outer_iter_mut())
                .and(a_b.outer_iter())
                .and(b_b.outer_iter())
                .for_each(|mut out_h, a_h, b_h| {
                    let a_s = a_h.as_standard_layout();
                    let b_s = b_h.as_standard_layout();
                    let o_s = out_h.as_slice_mut().expect("output buffer must be contiguous");

                    faer::linalg::matmul::matmul(
                        faer::mat::from_row_major_slice_mut(o_s, m, n),
                        faer::mat::from_row_major_slice(a_s.as_slice().unwrap(), m, k),
                        faer::mat::from_row_major_slice(b_s.as_slice().unwrap(), k, n),
                        None,
                        1.0,
                        // Already parallel over the batch axis.
                        Parallelism::None,
                    );
                });
        });

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[f32], b: &[f32], tol: f32, msg: &str) {
        assert_eq!(a.len(), b.len(), "{}: length mismatch", msg);
        for (i, (&x, &y)) in a.iter().zip(b.iter()).enumerate() {
            assert!(
                (x - y).abs() <= tol,
                "{}: mismatch at {}: {} vs {}",
                msg,
                i,
                x,
                y
            );
        }
    }

    fn reference_matmul_2d(a: &Array2<f32>, b: &Array2<f32>) -> Array2<f32> {
        let (m, k) = a.dim();
        let (_, n) = b.dim();
        let mut c = Array2::<f32>::zeros((m, n));
        for i in 0..m {
            for j in 0..n {
                for l in 0..k {
                    c[[i, j]] += a[[i, l]] * b[[l, j]];
                }
            }
        }
        c
    }

    #[test]
    fn test_matmul_2d_matches_reference() {
        let a = Array2::from_shape_fn((4, 7), |(i, j)| (i * 7 + j) as f32 * 0.1);
        let b = Array2::from_shape_fn((7, 3), |(i, j)| ((i + j) % 5) as f32 * 0.2);

        let result = matmul_2d(&a.view(), &b.view());
        let expected = reference_matmul_2d(&a, &b);

        assert_close(
            result.as_slice().unwrap(),
            expected.as_slice().unwrap(),
            1e-4,
            "matmul_2d",
        );
    }

    #[test]
    fn test_matmul_2d_transposed_matches_reference() {
        let a = Array2::from_shape_fn((2, 6), |(i, j)| (i + j) as f32 * 0.3);
        let b_t = Array2::from_shape_fn((5, 6), |(i, j)| ((i * j) % 4) as f32 * 0.25);
        let b = b_t.t().to_owned();

        let result = matmul_2d_transposed(&a.view(), &b_t.view());
        let expected = reference_matmul_2d(&a, &b);

        assert_close(
            result.as_slice().unwrap(),
            expected.as_slice().unwrap(),
            1e-4,
            "matmul_2d_transposed",
        );
    }

    #[test]
    fn test_matmul_3d_2d_per_batch() {
        let a = Array3::from_shape_fn((2, 3, 4), |(b, i, j)| (b * 12 + i * 4 + j) as f32);
        let b = Array2::from_shape_fn((4, 5), |(i, j)| (i + j) as f32);

        let result = matmul_3d_2d(&a, &b);
        assert_eq!(result.dim(), (2, 3, 5));

        for batch in 0..2 {
            let a_slice = a.slice(ndarray::s![batch, .., ..]).to_owned();
            let expected = reference_matmul_2d(&a_slice, &b);
            let got = result.slice(ndarray::s![batch, .., ..]);
            assert_close(
                got.to_owned().as_slice().unwrap(),
                expected.as_slice().unwrap(),
                1e-4,
                "matmul_3d_2d",
            );
        }
    }

    #[test]
    fn test_matmul_4d_attention_shapes() {
        let q = Array4::from_shape_fn((2, 4, 6, 8), |(b, h, s, d)| {
            ((b + h + s + d) % 10) as f32 * 0.1
        });
        let k_t = Array4::from_shape_fn((2, 4, 8, 6), |(b, h, d, s)| {
            ((b * h + d + s) % 7) as f32 * 0.1
        });

        let scores = matmul_4d(&q, &k_t);
        assert_eq!(scores.dim(), (2, 4, 6, 6));

        // Spot-check one entry against a scalar reduction.
        let mut expected = 0.0;
        for d in 0..8 {
            expected += q[[1, 2, 3, d]] * k_t[[1, 2, d, 4]];
        }
        assert!((scores[[1, 2, 3, 4]] - expected).abs() < 1e-4);
    }
}
