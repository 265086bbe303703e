//! Token embedding layer
//!
//! Maps `[B, T]` token ids to the time-major `[T, B, D]` tensor the
//! recurrent encoder consumes. An id at or beyond the vocabulary is a data
//! error and fails the call; nothing is clamped or zero-filled.

use ndarray::{s, Array2, Array3, ArrayView2, ArrayViewD};

use crate::error::{ModelError, Result};

/// Embedding lookup table
pub struct Embedding {
    /// Weight matrix, `[vocab_size, input_size]`
    weight: Array2<f32>,
}

impl Embedding {
    /// Create a table with deterministic small-magnitude initial weights
    pub fn new(vocab_size: usize, input_size: usize) -> Self {
        let scale = (1.0 / input_size as f32).sqrt();
        Self {
            weight: Array2::from_shape_fn((vocab_size, input_size), |(i, j)| {
                ((i * input_size + j) as f32 * 0.111).sin() * scale
            }),
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.weight.nrows()
    }

    pub fn input_size(&self) -> usize {
        self.weight.ncols()
    }

    /// Look up a batch of sequences, producing time-major embeddings
    ///
    /// # Arguments
    /// * `ids` - token ids, `[B, T]`
    ///
    /// # Returns
    /// Embedded vectors, `[T, B, input_size]`
    pub fn forward(&self, ids: ArrayView2<'_, u32>) -> Result<Array3<f32>> {
        let (batch, time) = ids.dim();
        let mut out = Array3::zeros((time, batch, self.input_size()));
        for b in 0..batch {
            for t in 0..time {
                let id = ids[[b, t]] as usize;
                if id >= self.vocab_size() {
                    return Err(ModelError::DataRange {
                        what: "token id",
                        value: id as i64,
                        limit: self.vocab_size(),
                    });
                }
                out.slice_mut(s![t, b, ..]).assign(&self.weight.row(id));
            }
        }
        Ok(out)
    }

    /// Named weight views for checkpoint enumeration
    pub fn parameters(&self) -> Vec<(String, ArrayViewD<'_, f32>)> {
        vec![("embedding.weight".to_string(), self.weight.view().into_dyn())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_forward_shape_is_time_major() {
        let embed = Embedding::new(50, 8);
        let ids = array![[1u32, 2, 3], [4, 5, 6]];
        let out = embed.forward(ids.view()).unwrap();
        assert_eq!(out.dim(), (3, 2, 8));
    }

    #[test]
    fn test_forward_copies_weight_rows() {
        let embed = Embedding::new(50, 4);
        let ids = array![[7u32, 49]];
        let out = embed.forward(ids.view()).unwrap();
        for j in 0..4 {
            assert_eq!(out[[0, 0, j]], embed.weight[[7, j]]);
            assert_eq!(out[[1, 0, j]], embed.weight[[49, j]]);
        }
    }

    #[test]
    fn test_out_of_range_id_fails() {
        let embed = Embedding::new(50, 4);
        let ids = array![[0u32, 50]];
        let err = embed.forward(ids.view()).unwrap_err();
        assert!(matches!(err, ModelError::DataRange { .. }));
    }

    #[test]
    fn test_init_is_deterministic_and_finite() {
        let a = Embedding::new(30, 6);
        let b = Embedding::new(30, 6);
        assert_eq!(a.weight, b.weight);
        assert!(a.weight.iter().all(|v| v.is_finite()));
        // not degenerate
        let min = a.weight.iter().copied().fold(f32::INFINITY, f32::min);
        let max = a.weight.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        assert!(max - min > 1e-6);
    }

    #[test]
    fn test_parameters_shape() {
        let embed = Embedding::new(20, 5);
        let params = embed.parameters();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].1.shape(), &[20, 5]);
    }
}
