//! Flat output projection

use ndarray::{Array1, Array2, ArrayView2, ArrayViewD};

use crate::error::{ModelError, Result};
use crate::softmax::log_softmax_inplace;

/// One dense matrix to vocabulary logits plus log-softmax
pub struct LinearProjection {
    weight: Array2<f32>,
    bias: Array1<f32>,
    in_features: usize,
}

impl LinearProjection {
    pub fn new(in_features: usize, vocab_size: usize) -> Self {
        let scale = (2.0 / (in_features + vocab_size) as f32).sqrt();
        Self {
            weight: Array2::from_shape_fn((vocab_size, in_features), |(i, j)| {
                ((i * in_features + j) as f32 * 0.137).sin() * scale
            }),
            bias: Array1::zeros(vocab_size),
            in_features,
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.weight.nrows()
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    fn check_hidden(&self, hidden: ArrayView2<'_, f32>) -> Result<()> {
        if hidden.ncols() != self.in_features {
            return Err(ModelError::shape(
                "projection input",
                format!("[N, {}]", self.in_features),
                format!("[{}, {}]", hidden.nrows(), hidden.ncols()),
            ));
        }
        Ok(())
    }

    /// Dense `[N, vocab_size]` log-probabilities
    pub fn log_probs(&self, hidden: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        self.check_hidden(hidden)?;
        let mut logits = hidden.dot(&self.weight.t());
        logits += &self.bias;
        log_softmax_inplace(&mut logits);
        Ok(logits)
    }

    /// Target-indexed log-probabilities. A flat projection has no cheaper
    /// path than the dense one, so this normalizes every row and indexes.
    pub fn target_log_probs(
        &self,
        hidden: ArrayView2<'_, f32>,
        targets: &[i64],
        ignore_id: i64,
    ) -> Result<Array1<f32>> {
        if targets.len() != hidden.nrows() {
            return Err(ModelError::shape(
                "projection targets",
                format!("[{}]", hidden.nrows()),
                format!("[{}]", targets.len()),
            ));
        }
        let dense = self.log_probs(hidden)?;
        let vocab = self.vocab_size();
        let mut out = Array1::zeros(targets.len());
        for (row, &target) in targets.iter().enumerate() {
            if target == ignore_id {
                continue;
            }
            if target < 0 || target as usize >= vocab {
                return Err(ModelError::DataRange {
                    what: "target id",
                    value: target,
                    limit: vocab,
                });
            }
            out[row] = dense[[row, target as usize]];
        }
        Ok(out)
    }

    pub fn parameters(&self) -> Vec<(String, ArrayViewD<'_, f32>)> {
        vec![
            ("out.weight".to_string(), self.weight.view().into_dyn()),
            ("out.bias".to_string(), self.bias.view().into_dyn()),
        ]
    }
}
