//! Output projection to vocabulary log-probabilities
//!
//! Two interchangeable implementations sit behind [`Projection`]:
//!
//! - [`LinearProjection`] - one flat matrix to vocabulary logits followed
//!   by log-softmax
//! - [`AdaptiveLogSoftmax`] - the vocabulary split into a head cluster and
//!   frequency-ordered tail clusters, each tail scored through a reduced
//!   projection, with an efficient target-scoring path that touches only
//!   the cluster a target lives in

pub mod adaptive;
pub mod linear;

pub use adaptive::AdaptiveLogSoftmax;
pub use linear::LinearProjection;

use ndarray::{Array1, Array2, ArrayView2, ArrayViewD};

use crate::config::RnnLmConfig;
use crate::error::Result;

/// The configured output layer
pub enum Projection {
    Linear(LinearProjection),
    Adaptive(AdaptiveLogSoftmax),
}

impl Projection {
    pub fn from_config(config: &RnnLmConfig) -> Result<Self> {
        if config.adaptive_softmax {
            Ok(Projection::Adaptive(AdaptiveLogSoftmax::new(
                config.hidden_size,
                config.vocab_size,
                &config.cutoffs,
                config.div_value,
            )?))
        } else {
            Ok(Projection::Linear(LinearProjection::new(
                config.hidden_size,
                config.vocab_size,
            )))
        }
    }

    pub fn vocab_size(&self) -> usize {
        match self {
            Projection::Linear(p) => p.vocab_size(),
            Projection::Adaptive(p) => p.vocab_size(),
        }
    }

    /// Dense per-row log-probabilities over the full vocabulary
    pub fn log_probs(&self, hidden: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        match self {
            Projection::Linear(p) => p.log_probs(hidden),
            Projection::Adaptive(p) => p.log_probs(hidden),
        }
    }

    /// Log-probability of each row's target class; rows whose target is
    /// `ignore_id` yield 0.0
    pub fn target_log_probs(
        &self,
        hidden: ArrayView2<'_, f32>,
        targets: &[i64],
        ignore_id: i64,
    ) -> Result<Array1<f32>> {
        match self {
            Projection::Linear(p) => p.target_log_probs(hidden, targets, ignore_id),
            Projection::Adaptive(p) => p.target_log_probs(hidden, targets, ignore_id),
        }
    }

    pub fn parameters(&self) -> Vec<(String, ArrayViewD<'_, f32>)> {
        match self {
            Projection::Linear(p) => p.parameters(),
            Projection::Adaptive(p) => p.parameters(),
        }
    }
}

/// Row-wise in-place log-softmax with max subtraction for stability
pub(crate) fn log_softmax_inplace(x: &mut Array2<f32>) {
    for mut row in x.outer_iter_mut() {
        let max = row.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        let lse = max + row.iter().map(|&v| (v - max).exp()).sum::<f32>().ln();
        row.mapv_inplace(|v| v - lse);
    }
}
