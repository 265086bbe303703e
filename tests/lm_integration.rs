//! End-to-end tests driving the public language-model API

use approx::assert_relative_eq;
use ndarray::{array, s, Array2, Array3};
use proptest::prelude::*;
use recurrente::mask::padding_mask;
use recurrente::softmax::AdaptiveLogSoftmax;
use recurrente::{CellType, Mode, RnnLm, RnnLmConfig, StackedRnn};

fn next_token_labels(ids: &Array2<u32>, lengths: &[usize]) -> Array2<i64> {
    Array2::from_shape_fn(ids.dim(), |(b, t)| {
        if t + 1 < lengths[b] {
            ids[[b, t + 1]] as i64
        } else {
            -1
        }
    })
}

#[test]
fn adaptive_gru_batch_produces_finite_metrics() {
    // batch of 2, lengths [3, 5], T = 5, vocab 10, cutoffs [4, 8],
    // hidden 6, one GRU layer, smoothing 0.1
    let config = RnnLmConfig::new(10, 4, 6)
        .with_adaptive(vec![4, 8], 2.0)
        .with_smoothing(0.1);
    let model = RnnLm::new(config).unwrap();

    let ids = array![[1u32, 2, 3, 0, 0], [4, 5, 6, 7, 8]];
    let lengths = [3usize, 5];
    let labels = next_token_labels(&ids, &lengths);
    let out = model
        .train_forward(ids.view(), &lengths, labels.view(), &lengths)
        .unwrap();

    assert!(out.loss.is_finite());
    assert!(out.loss >= 0.0);
    assert_eq!(out.per_seq_ppl.len(), 2);
    assert!(out
        .per_seq_ppl
        .iter()
        .all(|ppl| ppl.is_finite() && *ppl >= 0.0));
    assert!(out.batch_ppl.is_finite());
}

#[test]
fn all_ignore_labels_cost_exactly_zero() {
    let model = RnnLm::new(RnnLmConfig::tiny().with_smoothing(0.1)).unwrap();
    let ids = array![[3u32]];
    let labels = array![[-1i64]];
    let out = model
        .train_forward(ids.view(), &[1], labels.view(), &[1])
        .unwrap();
    assert_eq!(out.loss, 0.0);
    // per-sequence loss is 0, so its perplexity is exactly 1
    assert_eq!(out.per_seq_ppl[0], 1.0);
}

#[test]
fn head_cluster_width_includes_selectors() {
    // vocab 100 with cutoffs [20, 60]: 20 token classes + 2 selectors
    let softmax = AdaptiveLogSoftmax::new(8, 100, &[20, 60], 2.0).unwrap();
    assert_eq!(softmax.head_size(), 22);
}

#[test]
fn infer_step_distributions_normalize_for_adaptive_head() {
    let config = RnnLmConfig::new(100, 8, 12)
        .with_layers(2)
        .with_adaptive(vec![20, 60], 2.0);
    let model = RnnLm::new(config).unwrap();
    let mut state = model.initial_state(1);
    for token in [5u32, 42, 77, 99] {
        let input = Array2::from_elem((1, 1), token);
        let (log_probs, next) = model.infer_step(input.view(), &[1], &state).unwrap();
        let sum: f32 = log_probs.slice(s![0, 0, ..]).iter().map(|&v| v.exp()).sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-4);
        state = next;
    }
}

#[test]
fn normalized_mode_perplexity_matches_mean_sequence_loss() {
    let config = RnnLmConfig::new(20, 6, 8)
        .with_smoothing(0.1)
        .with_length_normalized(true);
    let model = RnnLm::new(config).unwrap();

    // equal-length sequences so the per-token mean and the mean of
    // per-sequence means coincide
    let ids = Array2::from_shape_fn((3, 6), |(b, t)| ((b * 5 + t * 3 + 2) % 20) as u32);
    let lengths = [6usize, 6, 6];
    let labels = next_token_labels(&ids, &lengths);
    let out = model
        .train_forward(ids.view(), &lengths, labels.view(), &lengths)
        .unwrap();

    assert_relative_eq!(out.batch_ppl, out.loss.exp(), epsilon = 1e-6);
    let mean_seq_loss: f32 =
        out.per_seq_ppl.mapv(f32::ln).sum() / out.per_seq_ppl.len() as f32;
    assert_relative_eq!(out.batch_ppl, mean_seq_loss.exp(), epsilon = 1e-4);
}

#[test]
fn length_normalization_changes_loss_scale() {
    let base = RnnLmConfig::new(20, 6, 8).with_smoothing(0.1);
    let summed = RnnLm::new(base.clone()).unwrap();
    let normalized = RnnLm::new(base.with_length_normalized(true)).unwrap();

    let ids = Array2::from_shape_fn((2, 8), |(b, t)| ((b * 3 + t * 7 + 1) % 20) as u32);
    let lengths = [8usize, 5];
    let labels = next_token_labels(&ids, &lengths);
    let summed_out = summed
        .train_forward(ids.view(), &lengths, labels.view(), &lengths)
        .unwrap();
    let normalized_out = normalized
        .train_forward(ids.view(), &lengths, labels.view(), &lengths)
        .unwrap();

    // multiple tokens per sequence: the summed scalar dominates the
    // per-token mean, while both batch perplexities agree because each is
    // exp of the per-token mean under its own convention
    assert!(summed_out.loss > normalized_out.loss);
    let scored = 7.0 + 4.0;
    assert_relative_eq!(
        summed_out.loss * 2.0 / scored,
        normalized_out.loss,
        epsilon = 1e-4
    );
}

#[test]
fn rescoring_accumulates_step_weights() {
    let model = RnnLm::new(RnnLmConfig::new(30, 6, 8).with_layers(2)).unwrap();
    let hypothesis = [2u32, 11, 7, 23];

    // accumulate transition weights the way an n-best rescorer does
    let mut state = model.initial_state(1);
    let mut total = 0.0;
    for pair in hypothesis.windows(2) {
        let (weight, next) = model.score_step(&state, pair[0], pair[1]).unwrap();
        total += weight;
        state = next;
    }

    // the same score from the batched training path: the unnormalized
    // per-sequence loss is the negated sum of transition weights
    let ids = Array2::from_shape_vec((1, 4), hypothesis.to_vec()).unwrap();
    let labels = next_token_labels(&ids, &[4]);
    let out = model
        .train_forward(ids.view(), &[4], labels.view(), &[4])
        .unwrap();
    let per_seq_loss = out.per_seq_ppl[0].ln();
    assert_relative_eq!(per_seq_loss, -total, epsilon = 1e-4);
}

#[test]
fn construction_errors_surface_before_first_call() {
    assert!(RnnLm::new(RnnLmConfig::new(100, 8, 8).with_adaptive(vec![], 2.0)).is_err());
    assert!(RnnLm::new(RnnLmConfig::new(100, 8, 8).with_adaptive(vec![60, 20], 2.0)).is_err());
    assert!(RnnLm::new(RnnLmConfig::new(100, 8, 8).with_adaptive(vec![20, 100], 2.0)).is_err());
    assert!(RnnLm::new(RnnLmConfig::tiny().with_layers(0)).is_err());
    assert!(RnnLm::new(RnnLmConfig::tiny().with_smoothing(-0.1)).is_err());
    assert!(RnnLm::new(RnnLmConfig::tiny().with_dropout(1.5)).is_err());
}

#[test]
fn token_id_out_of_range_fails_forward() {
    let model = RnnLm::new(RnnLmConfig::tiny()).unwrap();
    let ids = array![[3u32, 10]];
    let labels = array![[1i64, -1]];
    assert!(model
        .train_forward(ids.view(), &[2], labels.view(), &[2])
        .is_err());
}

proptest! {
    // encode_sequence over T steps equals T chained step calls for random
    // shapes, lengths and both cell families
    #[test]
    fn prop_encode_equals_chained_steps(
        cell_is_lstm in proptest::bool::ANY,
        layers in 1usize..4,
        time in 1usize..7,
        batch in 1usize..4,
        length_seed in 0usize..100,
    ) {
        let cell = if cell_is_lstm { CellType::Lstm } else { CellType::Gru };
        let rnn = StackedRnn::new(cell, 3, 5, layers, 0.0, 0).unwrap();
        let input = Array3::from_shape_fn((time, batch, 3), |(t, b, j)| {
            ((t * 23 + b * 11 + j * 5) as f32 * 0.21).sin()
        });
        let lengths: Vec<usize> = (0..batch)
            .map(|b| 1 + (length_seed + b * 3) % time)
            .collect();
        let mask = padding_mask(&lengths, time);

        let (batched, batched_state) =
            rnn.encode_sequence(&input, &mask, None, Mode::Eval).unwrap();

        let mut state = rnn.zero_state(batch);
        for t in 0..time {
            let (out_t, next) = rnn
                .step(input.slice(s![t, .., ..]), mask.row(t), &state)
                .unwrap();
            for b in 0..batch {
                for j in 0..5 {
                    prop_assert_eq!(out_t[[b, j]], batched[[t, b, j]]);
                }
            }
            state = next;
        }
        for (stepped, full) in state.layers().iter().zip(batched_state.layers()) {
            prop_assert_eq!(stepped.output(), full.output());
        }
    }

    // train_forward stays finite over random small configurations
    #[test]
    fn prop_train_forward_finite(
        adaptive in proptest::bool::ANY,
        smoothing in prop::sample::select(vec![0.0f32, 0.1, 0.3]),
        normalized in proptest::bool::ANY,
        time in 2usize..6,
        batch in 1usize..4,
    ) {
        let mut config = RnnLmConfig::new(12, 4, 6).with_smoothing(smoothing)
            .with_length_normalized(normalized);
        if adaptive {
            config = config.with_adaptive(vec![4, 8], 2.0);
        }
        let model = RnnLm::new(config).unwrap();
        let ids = Array2::from_shape_fn((batch, time), |(b, t)| ((b * 7 + t * 3 + 1) % 12) as u32);
        let lengths: Vec<usize> = (0..batch).map(|b| 1 + (b * 2 + 1) % time).collect();
        let labels = next_token_labels(&ids, &lengths);
        let out = model
            .train_forward(ids.view(), &lengths, labels.view(), &lengths)
            .unwrap();
        prop_assert!(out.loss.is_finite());
        prop_assert!(out.loss >= 0.0);
        prop_assert!(out.batch_ppl.is_finite());
        prop_assert!(out.per_seq_ppl.iter().all(|ppl| ppl.is_finite()));
    }
}
