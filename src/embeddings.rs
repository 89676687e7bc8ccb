//! Embedding tables with optional shared storage.
//!
//! Source, target and softmax-projection tables may alias the same
//! underlying matrix when the sharing flags are set. Aliasing is explicit:
//! a cloned handle points at the same storage, so a weight update through
//! one name is observed through every alias.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{ensure, Result};
use ndarray::{s, Array2, Array3, ArrayView2};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;

use crate::linalg::matmul_2d_transposed;

/// A `[vocab, hidden]` embedding matrix behind a shared, lockable handle.
#[derive(Clone)]
pub struct EmbeddingTable {
    storage: Arc<RwLock<Array2<f32>>>,
}

impl EmbeddingTable {
    /// New table initialized N(0, hidden_size^-0.5).
    pub fn init(vocab_size: usize, hidden_size: usize, rng: &mut StdRng) -> Result<Self> {
        let std = (hidden_size as f32).powf(-0.5);
        let dist = Normal::new(0.0, std)?;
        let table = Array2::random_using((vocab_size, hidden_size), dist, rng);
        Ok(Self::from_array(table))
    }

    pub fn from_array(table: Array2<f32>) -> Self {
        Self {
            storage: Arc::new(RwLock::new(table)),
        }
    }

    /// A handle to the same storage. Not a copy: writes through either
    /// handle are visible through both.
    pub fn alias(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }

    pub fn shares_storage_with(&self, other: &EmbeddingTable) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    pub fn dims(&self) -> (usize, usize) {
        self.read().dim()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Array2<f32>> {
        self.storage.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Array2<f32>> {
        self.storage.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Gathers token rows into `[batch, len, hidden]`.
    pub fn lookup(&self, tokens: &ArrayView2<u32>) -> Result<Array3<f32>> {
        let table = self.read();
        let (vocab, hidden) = table.dim();
        let (batch, len) = tokens.dim();

        let mut out = Array3::zeros((batch, len, hidden));
        for (b, row) in tokens.outer_iter().enumerate() {
            for (pos, &token) in row.iter().enumerate() {
                ensure!(
                    (token as usize) < vocab,
                    "token id {} out of range for vocabulary of size {}",
                    token,
                    vocab
                );
                out.slice_mut(s![b, pos, ..]).assign(&table.row(token as usize));
            }
        }
        Ok(out)
    }

    /// Projects `[positions, hidden]` activations onto vocabulary logits
    /// `[positions, vocab]` against the transposed table.
    pub fn project(&self, hidden: &ArrayView2<f32>) -> Array2<f32> {
        let table = self.read();
        matmul_2d_transposed(hidden, &table.view())
    }
}
