//! Language-model wrapper
//!
//! [`RnnLm`] wires embedder, masked stacked encoder, output projection and
//! smoothed loss into the two contracts collaborators consume:
//!
//! - [`RnnLm::train_forward`] - full-sequence loss and perplexity for a
//!   padded batch
//! - [`RnnLm::infer_step`] - one token of incremental decoding, with the
//!   hidden state owned by the caller between calls
//!
//! The step path reuses the encoder's single shared transition, so feeding
//! any prefix token-by-token reproduces the batched computation exactly.

use ndarray::{s, Array1, Array2, Array3, ArrayView2, ArrayViewD, Axis};

use crate::config::RnnLmConfig;
use crate::embedding::Embedding;
use crate::error::{ModelError, Result};
use crate::loss::LabelSmoothingLoss;
use crate::mask::padding_mask;
use crate::rnn::{Mode, RnnState, StackedRnn};
use crate::softmax::Projection;
use crate::trace::{Phase, TRACER};

/// Everything `train_forward` hands back to the training loop
#[derive(Debug, Clone)]
pub struct LmOutput {
    /// Batch scalar loss under the configured reduction
    pub loss: f32,
    /// Per-sequence perplexity, `exp` of each per-sequence loss
    pub per_seq_ppl: Array1<f32>,
    /// Batch perplexity, consistent with the active reduction mode
    pub batch_ppl: f32,
}

/// Recurrent language model
pub struct RnnLm {
    config: RnnLmConfig,
    embedding: Embedding,
    encoder: StackedRnn,
    projection: Projection,
    criterion: LabelSmoothingLoss,
}

impl RnnLm {
    /// Build the model; every configuration error surfaces here
    pub fn new(config: RnnLmConfig) -> Result<Self> {
        config.validate()?;
        let embedding = Embedding::new(config.vocab_size, config.input_size);
        let encoder = StackedRnn::new(
            config.cell,
            config.input_size,
            config.hidden_size,
            config.num_layers,
            config.dropout,
            config.seed,
        )?;
        let projection = Projection::from_config(&config)?;
        let criterion = LabelSmoothingLoss::new(
            config.vocab_size,
            config.ignore_id,
            config.smoothing,
            config.length_normalized,
        )?;
        Ok(Self {
            config,
            embedding,
            encoder,
            projection,
            criterion,
        })
    }

    pub fn config(&self) -> &RnnLmConfig {
        &self.config
    }

    /// Zero hidden state for a fresh batch
    pub fn initial_state(&self, batch: usize) -> RnnState {
        self.encoder.zero_state(batch)
    }

    /// Full-sequence training forward
    ///
    /// # Arguments
    /// * `input_ids` - `[B, T]` token ids
    /// * `input_lengths` - valid length per sequence, each in `[1, T]`
    /// * `labels` - `[B, T]` target ids, the ignore id marks unscored
    ///   positions
    /// * `label_lengths` - valid label count per sequence, used for the
    ///   batch perplexity scaling
    ///
    /// # Returns
    /// [`LmOutput`] with the batch scalar loss, per-sequence perplexity
    /// and batch perplexity. Perplexity follows the configured reduction:
    /// `exp(loss)` when length-normalized, else
    /// `exp(loss * B / total_label_tokens)` - both are exp of the mean
    /// per-token loss.
    pub fn train_forward(
        &self,
        input_ids: ArrayView2<'_, u32>,
        input_lengths: &[usize],
        labels: ArrayView2<'_, i64>,
        label_lengths: &[usize],
    ) -> Result<LmOutput> {
        let (batch, time) = input_ids.dim();
        if batch == 0 || time == 0 {
            return Err(ModelError::shape(
                "train batch",
                "B >= 1 and T >= 1",
                format!("[{batch}, {time}]"),
            ));
        }
        if input_lengths.len() != batch
            || labels.nrows() != batch
            || label_lengths.len() != batch
        {
            return Err(ModelError::shape(
                "train batch",
                format!("matching batch size {batch}"),
                format!(
                    "input_lengths {}, labels {}, label_lengths {}",
                    input_lengths.len(),
                    labels.nrows(),
                    label_lengths.len()
                ),
            ));
        }
        if labels.ncols() != time {
            return Err(ModelError::shape(
                "train labels",
                format!("[{batch}, {time}]"),
                format!("[{}, {}]", labels.nrows(), labels.ncols()),
            ));
        }
        for &len in input_lengths.iter().chain(label_lengths) {
            if len == 0 || len > time {
                return Err(ModelError::shape(
                    "sequence lengths",
                    format!("each in [1, {time}]"),
                    len.to_string(),
                ));
            }
        }

        let mask = padding_mask(input_lengths, time);
        let embedded = TRACER.span(Phase::Embed, || self.embedding.forward(input_ids))?;
        let (encoded, _state) = TRACER.span(Phase::Encode, || {
            self.encoder
                .encode_sequence(&embedded, &mask, None, Mode::Train)
        })?;

        // flatten [T, B, H] to batch-major rows so row b*T + t scores
        // position (b, t)
        let hidden_size = self.encoder.hidden_size();
        let mut hidden = Array2::zeros((batch * time, hidden_size));
        for b in 0..batch {
            for t in 0..time {
                hidden
                    .row_mut(b * time + t)
                    .assign(&encoded.slice(s![t, b, ..]));
            }
        }

        let labels_owned = labels.to_owned();
        let (loss, per_seq_loss) = TRACER.span(Phase::Loss, || {
            if self.criterion.smoothing() == 0.0 {
                // hard targets need only the target column: use the
                // projection's efficient scoring path
                let flat: Vec<i64> = (0..batch)
                    .flat_map(|b| (0..time).map(move |t| labels[[b, t]]))
                    .collect();
                let gathered = self.projection.target_log_probs(
                    hidden.view(),
                    &flat,
                    self.config.ignore_id,
                )?;
                let gathered = Array2::from_shape_fn((batch, time), |(b, t)| {
                    gathered[b * time + t]
                });
                self.criterion.forward_gathered(&gathered, &labels_owned)
            } else {
                let flat_lp = TRACER.span(Phase::Project, || {
                    self.projection.log_probs(hidden.view())
                })?;
                let vocab = self.config.vocab_size;
                let mut log_probs = Array3::zeros((batch, time, vocab));
                for b in 0..batch {
                    for t in 0..time {
                        log_probs
                            .slice_mut(s![b, t, ..])
                            .assign(&flat_lp.row(b * time + t));
                    }
                }
                self.criterion.forward(&log_probs, &labels_owned)
            }
        })?;

        let total_label_tokens: usize = label_lengths.iter().sum();
        let batch_ppl = if self.config.length_normalized {
            loss.exp()
        } else {
            (loss * batch as f32 / total_label_tokens.max(1) as f32).exp()
        };
        Ok(LmOutput {
            loss,
            per_seq_ppl: per_seq_loss.mapv(f32::exp),
            batch_ppl,
        })
    }

    /// One token of incremental decoding
    ///
    /// # Arguments
    /// * `input_ids` - `[B, 1]` current token per sequence
    /// * `seq_lens` - per-sequence activity flag: 0 freezes that
    ///   sequence's state, anything else advances it
    /// * `state` - hidden state from `initial_state` or the previous step
    ///
    /// # Returns
    /// `[B, 1, V]` next-token log-probabilities and the new state.
    /// Pure function of its arguments; the model retains nothing between
    /// calls, so the caller may reuse, discard or checkpoint states
    /// freely.
    pub fn infer_step(
        &self,
        input_ids: ArrayView2<'_, u32>,
        seq_lens: &[usize],
        state: &RnnState,
    ) -> Result<(Array3<f32>, RnnState)> {
        let (batch, cols) = input_ids.dim();
        if cols != 1 {
            return Err(ModelError::shape(
                "step input",
                format!("[{batch}, 1]"),
                format!("[{batch}, {cols}]"),
            ));
        }
        if seq_lens.len() != batch {
            return Err(ModelError::shape(
                "step lengths",
                format!("[{batch}]"),
                format!("[{}]", seq_lens.len()),
            ));
        }

        let mask = padding_mask(seq_lens, 1);
        let embedded = TRACER.span(Phase::Embed, || self.embedding.forward(input_ids))?;
        let (output, new_state) = TRACER.span(Phase::Step, || {
            self.encoder
                .step(embedded.index_axis(Axis(0), 0), mask.row(0), state)
        })?;
        let log_probs =
            TRACER.span(Phase::Project, || self.projection.log_probs(output.view()))?;

        let vocab = self.config.vocab_size;
        let mut out = Array3::zeros((batch, 1, vocab));
        for b in 0..batch {
            out.slice_mut(s![b, 0, ..]).assign(&log_probs.row(b));
        }
        Ok((out, new_state))
    }

    /// Single-sequence rescoring step
    ///
    /// Feeds `token_id` through the incremental path and returns the
    /// log-probability of `next_token_id` under the advanced state - the
    /// transition weight an n-best rescorer accumulates - plus the state
    /// to carry forward.
    pub fn score_step(
        &self,
        state: &RnnState,
        token_id: u32,
        next_token_id: u32,
    ) -> Result<(f32, RnnState)> {
        if state.batch() != 1 {
            return Err(ModelError::shape(
                "rescoring state",
                "[1, H] per layer",
                format!("[{}, _] per layer", state.batch()),
            ));
        }
        if next_token_id as usize >= self.config.vocab_size {
            return Err(ModelError::DataRange {
                what: "token id",
                value: next_token_id as i64,
                limit: self.config.vocab_size,
            });
        }
        let input = Array2::from_elem((1, 1), token_id);
        let (log_probs, new_state) = self.infer_step(input.view(), &[1], state)?;
        Ok((log_probs[[0, 0, next_token_id as usize]], new_state))
    }

    /// Every named weight tensor with its stable shape
    pub fn parameters(&self) -> Vec<(String, ArrayViewD<'_, f32>)> {
        let mut params = self.embedding.parameters();
        params.extend(self.encoder.parameters());
        params.extend(self.projection.parameters());
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CellType;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn demo_ids(batch: usize, time: usize, vocab: usize) -> Array2<u32> {
        Array2::from_shape_fn((batch, time), |(b, t)| ((b * 7 + t * 3 + 1) % vocab) as u32)
    }

    fn demo_labels(ids: &Array2<u32>, lengths: &[usize]) -> Array2<i64> {
        // next-token labels with padded positions ignored
        Array2::from_shape_fn(ids.dim(), |(b, t)| {
            if t + 1 < lengths[b] {
                ids[[b, t + 1]] as i64
            } else {
                -1
            }
        })
    }

    #[test]
    fn test_new_validates_config() {
        assert!(RnnLm::new(RnnLmConfig::tiny()).is_ok());
        assert!(RnnLm::new(RnnLmConfig::tiny().with_layers(0)).is_err());
        assert!(RnnLm::new(RnnLmConfig::new(100, 8, 8).with_adaptive(vec![200], 2.0)).is_err());
    }

    #[test]
    fn test_train_forward_returns_finite_metrics() {
        let config = RnnLmConfig::tiny().with_smoothing(0.1);
        let model = RnnLm::new(config).unwrap();
        let ids = demo_ids(2, 5, 10);
        let lengths = [3, 5];
        let labels = demo_labels(&ids, &lengths);
        let out = model
            .train_forward(ids.view(), &lengths, labels.view(), &lengths)
            .unwrap();
        assert!(out.loss.is_finite());
        assert!(out.loss >= 0.0);
        assert!(out.batch_ppl.is_finite());
        assert_eq!(out.per_seq_ppl.len(), 2);
        assert!(out.per_seq_ppl.iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    #[test]
    fn test_train_forward_rejects_batch_mismatch() {
        let model = RnnLm::new(RnnLmConfig::tiny()).unwrap();
        let ids = demo_ids(2, 5, 10);
        let labels = demo_labels(&ids, &[5, 5]);
        assert!(model
            .train_forward(ids.view(), &[5], labels.view(), &[5, 5])
            .is_err());
        assert!(model
            .train_forward(ids.view(), &[5, 5], labels.view(), &[5])
            .is_err());
        let short_labels = labels.slice(s![.., ..4]).to_owned();
        assert!(model
            .train_forward(ids.view(), &[5, 5], short_labels.view(), &[5, 5])
            .is_err());
    }

    #[test]
    fn test_train_forward_rejects_bad_lengths() {
        let model = RnnLm::new(RnnLmConfig::tiny()).unwrap();
        let ids = demo_ids(2, 5, 10);
        let labels = demo_labels(&ids, &[5, 5]);
        assert!(model
            .train_forward(ids.view(), &[0, 5], labels.view(), &[5, 5])
            .is_err());
        assert!(model
            .train_forward(ids.view(), &[5, 6], labels.view(), &[5, 5])
            .is_err());
    }

    #[test]
    fn test_normalized_batch_ppl_is_exp_of_loss() {
        let config = RnnLmConfig::tiny()
            .with_smoothing(0.1)
            .with_length_normalized(true);
        let model = RnnLm::new(config).unwrap();
        let ids = demo_ids(2, 4, 10);
        let lengths = [4, 4];
        let labels = demo_labels(&ids, &lengths);
        let out = model
            .train_forward(ids.view(), &lengths, labels.view(), &lengths)
            .unwrap();
        assert_relative_eq!(out.batch_ppl, out.loss.exp(), epsilon = 1e-6);
        // with equal-length sequences this also equals the mean
        // per-sequence loss exponentiated
        let mean_seq_loss: f32 =
            out.per_seq_ppl.mapv(f32::ln).sum() / out.per_seq_ppl.len() as f32;
        assert_relative_eq!(out.batch_ppl, mean_seq_loss.exp(), epsilon = 1e-4);
    }

    #[test]
    fn test_hard_target_path_matches_dense_path() {
        // smoothing 0 routes through the gathered scorer; verify against a
        // model configured identically but forced down the dense path by a
        // vanishing smoothing weight
        let adaptive = RnnLmConfig::tiny().with_adaptive(vec![4, 8], 2.0);
        let model_hard = RnnLm::new(adaptive.clone()).unwrap();
        let model_soft = RnnLm::new(adaptive.with_smoothing(1e-12)).unwrap();
        let ids = demo_ids(2, 5, 10);
        let lengths = [3, 5];
        let labels = demo_labels(&ids, &lengths);
        let hard = model_hard
            .train_forward(ids.view(), &lengths, labels.view(), &lengths)
            .unwrap();
        let soft = model_soft
            .train_forward(ids.view(), &lengths, labels.view(), &lengths)
            .unwrap();
        assert_relative_eq!(hard.loss, soft.loss, epsilon = 1e-4);
    }

    #[test]
    fn test_infer_step_threads_state() {
        let model = RnnLm::new(RnnLmConfig::tiny().with_layers(2)).unwrap();
        let mut state = model.initial_state(1);
        let tokens = [1u32, 2, 3, 4];
        for &token in &tokens {
            let input = Array2::from_elem((1, 1), token);
            let (log_probs, next) = model.infer_step(input.view(), &[1], &state).unwrap();
            assert_eq!(log_probs.dim(), (1, 1, 10));
            let sum: f32 = log_probs.slice(s![0, 0, ..]).iter().map(|&v| v.exp()).sum();
            assert_relative_eq!(sum, 1.0, epsilon = 1e-5);
            state = next;
        }
    }

    #[test]
    fn test_infer_step_matches_batched_encoder() {
        for cell in [CellType::Gru, CellType::Lstm] {
            let config = RnnLmConfig::tiny().with_layers(2).with_cell(cell);
            let model = RnnLm::new(config).unwrap();
            let ids = demo_ids(1, 4, 10);

            // batched: encode the prefix and project the last position
            let mask = padding_mask(&[4], 4);
            let embedded = model.embedding.forward(ids.view()).unwrap();
            let (encoded, _) = model
                .encoder
                .encode_sequence(&embedded, &mask, None, Mode::Eval)
                .unwrap();
            let last = encoded.slice(s![3, .., ..]).to_owned();
            let batched_lp = model.projection.log_probs(last.view()).unwrap();

            // incremental: same prefix token-by-token
            let mut state = model.initial_state(1);
            let mut stepped_lp = None;
            for t in 0..4 {
                let input = Array2::from_elem((1, 1), ids[[0, t]]);
                let (lp, next) = model.infer_step(input.view(), &[1], &state).unwrap();
                stepped_lp = Some(lp);
                state = next;
            }
            let stepped_lp = stepped_lp.unwrap();
            for v in 0..10 {
                assert_relative_eq!(
                    stepped_lp[[0, 0, v]],
                    batched_lp[[0, v]],
                    epsilon = 1e-6
                );
            }
        }
    }

    #[test]
    fn test_infer_step_rejects_foreign_state() {
        let model = RnnLm::new(RnnLmConfig::tiny().with_layers(2)).unwrap();
        let other = RnnLm::new(RnnLmConfig::tiny().with_layers(3)).unwrap();
        let input = Array2::from_elem((1, 1), 1u32);
        let state = other.initial_state(1);
        assert!(model.infer_step(input.view(), &[1], &state).is_err());
    }

    #[test]
    fn test_infer_step_zero_length_freezes_state() {
        let model = RnnLm::new(RnnLmConfig::tiny()).unwrap();
        let state = model.initial_state(2);
        let input = array![[3u32], [4u32]];
        let (_, new_state) = model.infer_step(input.view(), &[1, 0], &state).unwrap();
        // sequence 1 was frozen: its state is still the initial zeros
        let layer = &new_state.layers()[0];
        assert!(layer.output().row(1).iter().all(|&v| v == 0.0));
        assert!(layer.output().row(0).iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_score_step_matches_infer_step() {
        let model = RnnLm::new(RnnLmConfig::tiny()).unwrap();
        let state = model.initial_state(1);
        let (weight, _) = model.score_step(&state, 2, 7).unwrap();
        let input = Array2::from_elem((1, 1), 2u32);
        let (lp, _) = model.infer_step(input.view(), &[1], &state).unwrap();
        assert_eq!(weight, lp[[0, 0, 7]]);
    }

    #[test]
    fn test_score_step_rejects_out_of_range_token() {
        let model = RnnLm::new(RnnLmConfig::tiny()).unwrap();
        let state = model.initial_state(1);
        assert!(model.score_step(&state, 2, 10).is_err());
    }

    #[test]
    fn test_parameters_enumerate_all_components() {
        let config = RnnLmConfig::tiny()
            .with_layers(2)
            .with_adaptive(vec![4, 8], 2.0);
        let model = RnnLm::new(config).unwrap();
        let names: Vec<_> = model.parameters().into_iter().map(|(n, _)| n).collect();
        assert!(names.contains(&"embedding.weight".to_string()));
        assert!(names.contains(&"encoder.layer0.w_ih".to_string()));
        assert!(names.contains(&"encoder.layer1.w_hh".to_string()));
        assert!(names.contains(&"head.weight".to_string()));
        assert!(names.contains(&"tail1.out".to_string()));
    }
}
