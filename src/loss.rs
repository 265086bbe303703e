//! Label-smoothing cross-entropy
//!
//! Each non-ignored target becomes a smoothed distribution: mass `1 - e`
//! on the true class and `e / (V - 1)` on every other class, which sums to
//! one. The loss is the cross-entropy of that distribution against the
//! model's log-probabilities. Positions labeled with the ignore id
//! contribute nothing - no loss and no normalization count.
//!
//! Reduction is an explicit configuration choice because it changes both
//! the loss scale and its gradient balance across sequences of different
//! lengths:
//!
//! - default: per-sequence losses are sums over scored positions and the
//!   batch scalar is their total divided by batch size
//! - `normalize_length`: per-sequence losses are means over scored
//!   positions and the batch scalar is the total divided by the number of
//!   scored tokens
//!
//! Under both conventions the batch perplexity derived in
//! [`crate::RnnLm::train_forward`] equals exp of the mean per-token loss.

use ndarray::{s, Array1, Array2, Array3};

use crate::error::{ModelError, Result};

/// Smoothed cross-entropy with ignore handling and configurable reduction
pub struct LabelSmoothingLoss {
    vocab_size: usize,
    ignore_id: i64,
    smoothing: f32,
    normalize_length: bool,
}

impl LabelSmoothingLoss {
    pub fn new(
        vocab_size: usize,
        ignore_id: i64,
        smoothing: f32,
        normalize_length: bool,
    ) -> Result<Self> {
        if vocab_size < 2 {
            return Err(ModelError::Config(format!(
                "vocab_size must be at least 2, got {vocab_size}"
            )));
        }
        if !(0.0..1.0).contains(&smoothing) {
            return Err(ModelError::Config(format!(
                "smoothing must lie in [0, 1), got {smoothing}"
            )));
        }
        Ok(Self {
            vocab_size,
            ignore_id,
            smoothing,
            normalize_length,
        })
    }

    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }

    pub fn ignore_id(&self) -> i64 {
        self.ignore_id
    }

    pub fn normalize_length(&self) -> bool {
        self.normalize_length
    }

    /// Loss over dense log-probabilities
    ///
    /// # Arguments
    /// * `log_probs` - `[B, T, V]` per-position log-probabilities
    /// * `targets` - `[B, T]` label ids, ignore id excluded from loss
    ///
    /// # Returns
    /// The batch scalar and the per-sequence losses `[B]`. A sequence with
    /// no scored positions has per-sequence loss exactly 0.
    pub fn forward(
        &self,
        log_probs: &Array3<f32>,
        targets: &Array2<i64>,
    ) -> Result<(f32, Array1<f32>)> {
        let (batch, time, vocab) = log_probs.dim();
        if vocab != self.vocab_size {
            return Err(ModelError::shape(
                "loss log-probs",
                format!("[B, T, {}]", self.vocab_size),
                format!("[{batch}, {time}, {vocab}]"),
            ));
        }
        if targets.dim() != (batch, time) {
            return Err(ModelError::shape(
                "loss targets",
                format!("[{batch}, {time}]"),
                format!("{:?}", targets.dim()),
            ));
        }
        if batch == 0 {
            return Err(ModelError::shape("loss batch", "B >= 1", "B = 0"));
        }

        let confidence = 1.0 - self.smoothing;
        let off_mass = self.smoothing / (self.vocab_size - 1) as f32;
        let mut sums = vec![0.0_f32; batch];
        let mut counts = vec![0_usize; batch];
        for b in 0..batch {
            for t in 0..time {
                let target = targets[[b, t]];
                if target == self.ignore_id {
                    continue;
                }
                if target < 0 || target as usize >= self.vocab_size {
                    return Err(ModelError::DataRange {
                        what: "label id",
                        value: target,
                        limit: self.vocab_size,
                    });
                }
                let row = log_probs.slice(s![b, t, ..]);
                let target_lp = row[target as usize];
                let row_sum: f32 = row.sum();
                sums[b] -= confidence * target_lp + off_mass * (row_sum - target_lp);
                counts[b] += 1;
            }
        }
        Ok(self.reduce(&sums, &counts))
    }

    /// Loss over pre-gathered target log-probabilities
    ///
    /// Only valid without smoothing, where the smoothed distribution
    /// degenerates to one-hot and the cross-entropy needs nothing beyond
    /// the target column. Pairs with the projection's efficient scoring
    /// path; shares the masking and reduction of [`Self::forward`].
    pub fn forward_gathered(
        &self,
        target_log_probs: &Array2<f32>,
        targets: &Array2<i64>,
    ) -> Result<(f32, Array1<f32>)> {
        if self.smoothing != 0.0 {
            return Err(ModelError::Config(
                "gathered loss path requires smoothing == 0".into(),
            ));
        }
        let (batch, time) = targets.dim();
        if target_log_probs.dim() != (batch, time) {
            return Err(ModelError::shape(
                "gathered log-probs",
                format!("[{batch}, {time}]"),
                format!("{:?}", target_log_probs.dim()),
            ));
        }
        if batch == 0 {
            return Err(ModelError::shape("loss batch", "B >= 1", "B = 0"));
        }

        let mut sums = vec![0.0_f32; batch];
        let mut counts = vec![0_usize; batch];
        for b in 0..batch {
            for t in 0..time {
                let target = targets[[b, t]];
                if target == self.ignore_id {
                    continue;
                }
                if target < 0 || target as usize >= self.vocab_size {
                    return Err(ModelError::DataRange {
                        what: "label id",
                        value: target,
                        limit: self.vocab_size,
                    });
                }
                sums[b] -= target_log_probs[[b, t]];
                counts[b] += 1;
            }
        }
        Ok(self.reduce(&sums, &counts))
    }

    fn reduce(&self, sums: &[f32], counts: &[usize]) -> (f32, Array1<f32>) {
        let total: f32 = sums.iter().sum();
        let total_count: usize = counts.iter().sum();
        let per_seq = Array1::from_iter(sums.iter().zip(counts).map(|(&sum, &count)| {
            if self.normalize_length && count > 0 {
                sum / count as f32
            } else {
                sum
            }
        }));
        let scalar = if self.normalize_length {
            total / total_count.max(1) as f32
        } else {
            total / sums.len() as f32
        };
        (scalar, per_seq)
    }
}
