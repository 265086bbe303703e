//! Adaptive log-softmax over a frequency-partitioned vocabulary
//!
//! The vocabulary is split by strictly increasing cutoffs into a head
//! cluster `[0, c1)` and tail clusters `[c_i, c_{i+1})`. The head's output
//! carries one extra synthetic class per tail cluster; the post-softmax
//! probability of that selector class scales the cluster's internal
//! distribution, so a tail token's log-probability is
//! `log P(cluster | head) + log P(token | cluster)`. Each tail projects
//! the input down to `max(1, floor(in_features / div_value^depth))`
//! dimensions before scoring, which is what makes rare-token scoring
//! cheaper than one flat vocabulary-sized matrix multiply per row.
//!
//! The dense path reproduces exactly the distribution a flat softmax over
//! the same effective logits would give: every row sums to 1 in
//! probability space.

use ndarray::{s, Array1, Array2, ArrayView2, ArrayViewD, Axis};

use crate::config::validate_cutoffs;
use crate::error::{ModelError, Result};
use crate::softmax::log_softmax_inplace;

struct TailCluster {
    /// Dimensionality reduction, `[reduced, in_features]`
    proj: Array2<f32>,
    /// Cluster-local logits, `[cluster_size, reduced]`
    out: Array2<f32>,
    /// Token range `[lo, hi)` this cluster covers
    lo: usize,
    hi: usize,
}

/// Clustered output layer with head bias and bias-free two-stage tails
pub struct AdaptiveLogSoftmax {
    in_features: usize,
    vocab_size: usize,
    cutoffs: Vec<usize>,
    head_weight: Array2<f32>,
    head_bias: Array1<f32>,
    tails: Vec<TailCluster>,
}

impl AdaptiveLogSoftmax {
    /// Build the partition
    ///
    /// Fails when the cutoffs are empty, not strictly increasing, or not
    /// all below `vocab_size`, or when `div_value` is not positive.
    pub fn new(
        in_features: usize,
        vocab_size: usize,
        cutoffs: &[usize],
        div_value: f32,
    ) -> Result<Self> {
        validate_cutoffs(cutoffs, vocab_size)?;
        if !(div_value > 0.0 && div_value.is_finite()) {
            return Err(ModelError::Config(format!(
                "div_value must be positive and finite, got {div_value}"
            )));
        }
        if in_features == 0 {
            return Err(ModelError::Config("in_features must be positive".into()));
        }

        let head_size = cutoffs[0] + cutoffs.len();
        let scale = (2.0 / (in_features + head_size) as f32).sqrt();
        let head_weight = Array2::from_shape_fn((head_size, in_features), |(i, j)| {
            ((i * in_features + j) as f32 * 0.149).sin() * scale
        });
        let head_bias = Array1::zeros(head_size);

        // cluster i spans [cutoffs[i], cutoffs[i+1]) with vocab_size closing
        // the last range; its internal width shrinks with depth
        let mut bounds = cutoffs.to_vec();
        bounds.push(vocab_size);
        let tails = bounds
            .windows(2)
            .enumerate()
            .map(|(depth, pair)| {
                let (lo, hi) = (pair[0], pair[1]);
                let size = hi - lo;
                let reduced = ((in_features as f32 / div_value.powi(depth as i32 + 1)).floor()
                    as usize)
                    .clamp(1, in_features);
                let proj_scale = (2.0 / (in_features + reduced) as f32).sqrt();
                let out_scale = (2.0 / (reduced + size) as f32).sqrt();
                let phase = 0.157 + 0.013 * depth as f32;
                TailCluster {
                    proj: Array2::from_shape_fn((reduced, in_features), |(i, j)| {
                        ((i * in_features + j) as f32 * phase).sin() * proj_scale
                    }),
                    out: Array2::from_shape_fn((size, reduced), |(i, j)| {
                        ((i * reduced + j) as f32 * (phase + 0.05)).sin() * out_scale
                    }),
                    lo,
                    hi,
                }
            })
            .collect();

        Ok(Self {
            in_features,
            vocab_size,
            cutoffs: cutoffs.to_vec(),
            head_weight,
            head_bias,
            tails,
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Head width: first-cutoff token classes plus one selector per tail
    pub fn head_size(&self) -> usize {
        self.cutoffs[0] + self.tails.len()
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

    /// Normalized head distribution: token classes and cluster selectors
    fn head_log_probs(&self, hidden: ArrayView2<'_, f32>) -> Array2<f32> {
        let mut logits = hidden.dot(&self.head_weight.t());
        logits += &self.head_bias;
        log_softmax_inplace(&mut logits);
        logits
    }

    /// Cluster-local distribution for the given rows
    fn tail_log_probs(&self, tail: &TailCluster, hidden: ArrayView2<'_, f32>) -> Array2<f32> {
        let reduced = hidden.dot(&tail.proj.t());
        let mut logits = reduced.dot(&tail.out.t());
        log_softmax_inplace(&mut logits);
        logits
    }

    /// Dense `[N, vocab_size]` log-probabilities
    ///
    /// Materializes every cluster for every row; use
    /// [`AdaptiveLogSoftmax::target_log_probs`] when only target scores
    /// are needed.
    pub fn log_probs(&self, hidden: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        self.check_hidden(hidden)?;
        let rows = hidden.nrows();
        let head = self.head_log_probs(hidden);
        let head_tokens = self.cutoffs[0];

        let mut out = Array2::zeros((rows, self.vocab_size));
        out.slice_mut(s![.., ..head_tokens])
            .assign(&head.slice(s![.., ..head_tokens]));
        for (idx, tail) in self.tails.iter().enumerate() {
            let cluster = self.tail_log_probs(tail, hidden);
            let selector = head.column(head_tokens + idx);
            let shifted = &cluster + &selector.insert_axis(Axis(1));
            out.slice_mut(s![.., tail.lo..tail.hi]).assign(&shifted);
        }
        Ok(out)
    }

    /// Efficient target scoring
    ///
    /// Computes the head distribution for all rows, then the local
    /// distribution of only the single cluster each target lives in,
    /// grouping rows by cluster so no cluster is evaluated for rows that
    /// do not need it. Identical to indexing the dense output. Rows whose
    /// target is `ignore_id` yield 0.0.
    pub fn target_log_probs(
        &self,
        hidden: ArrayView2<'_, f32>,
        targets: &[i64],
        ignore_id: i64,
    ) -> Result<Array1<f32>> {
        self.check_hidden(hidden)?;
        if targets.len() != hidden.nrows() {
            return Err(ModelError::shape(
                "projection targets",
                format!("[{}]", hidden.nrows()),
                format!("[{}]", targets.len()),
            ));
        }
        let head = self.head_log_probs(hidden);
        let head_tokens = self.cutoffs[0];

        let mut out = Array1::zeros(targets.len());
        let mut rows_by_cluster: Vec<Vec<usize>> = vec![Vec::new(); self.tails.len()];
        for (row, &target) in targets.iter().enumerate() {
            if target == ignore_id {
                continue;
            }
            if target < 0 || target as usize >= self.vocab_size {
                return Err(ModelError::DataRange {
                    what: "target id",
                    value: target,
                    limit: self.vocab_size,
                });
            }
            let target = target as usize;
            if target < head_tokens {
                out[row] = head[[row, target]];
            } else {
                let cluster = self
                    .tails
                    .iter()
                    .position(|t| target >= t.lo && target < t.hi)
                    .expect("cutoff partition covers the vocabulary");
                rows_by_cluster[cluster].push(row);
            }
        }

        for (idx, rows) in rows_by_cluster.iter().enumerate() {
            if rows.is_empty() {
                continue;
            }
            let tail = &self.tails[idx];
            let subset = hidden.select(Axis(0), rows);
            let cluster = self.tail_log_probs(tail, subset.view());
            for (k, &row) in rows.iter().enumerate() {
                let local = targets[row] as usize - tail.lo;
                out[row] = head[[row, head_tokens + idx]] + cluster[[k, local]];
            }
        }
        Ok(out)
    }

    pub fn parameters(&self) -> Vec<(String, ArrayViewD<'_, f32>)> {
        let mut params = vec![
            ("head.weight".to_string(), self.head_weight.view().into_dyn()),
            ("head.bias".to_string(), self.head_bias.view().into_dyn()),
        ];
        for (idx, tail) in self.tails.iter().enumerate() {
            params.push((format!("tail{idx}.proj"), tail.proj.view().into_dyn()));
            params.push((format!("tail{idx}.out"), tail.out.view().into_dyn()));
        }
        params
    }
}
