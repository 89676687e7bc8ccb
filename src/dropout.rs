//! Explicit train/infer mode and dropout.
//!
//! There is no ambient "is training" flag: the mode is a tagged variant
//! threaded through every forward call that needs it, and the training
//! variant carries the random source so dropout stays a pure function of
//! its inputs.

use ndarray::{Array, Dimension};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Forward-pass mode.
///
/// `Train` enables dropout (and, at the model level, teacher-forced
/// full-sequence decoding); `Infer` takes the deterministic identity path
/// and enables incremental cached decoding.
pub enum Mode {
    Train { rng: StdRng },
    Infer,
}

impl Mode {
    /// Training mode with a seeded random source.
    pub fn train(seed: u64) -> Self {
        Mode::Train {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Deterministic inference mode.
    pub fn infer() -> Self {
        Mode::Infer
    }

    pub fn is_train(&self) -> bool {
        matches!(self, Mode::Train { .. })
    }
}

/// Inverted dropout: kept activations are scaled by `1 / (1 - rate)` so the
/// expected value is unchanged and inference needs no rescaling.
#[derive(Debug, Clone, Copy)]
pub struct Dropout {
    pub rate: f32,
}

impl Dropout {
    pub fn new(rate: f32) -> Self {
        debug_assert!((0.0..1.0).contains(&rate), "dropout rate out of range");
        Self { rate }
    }

    /// Applies dropout in `Train` mode; identity in `Infer` mode or at
    /// rate 0.
    pub fn forward<D: Dimension>(&self, x: Array<f32, D>, mode: &mut Mode) -> Array<f32, D> {
        match mode {
            Mode::Train { rng } if self.rate > 0.0 => {
                let scale = 1.0 / (1.0 - self.rate);
                let rate = self.rate;
                x.mapv(|v| {
                    if rng.gen::<f32>() < rate {
                        0.0
                    } else {
                        v * scale
                    }
                })
            }
            _ => x,
        }
    }
}
