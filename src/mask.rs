//! Padding mask construction

use ndarray::Array2;

/// Build the `[T, B]` time-major padding mask from per-sequence valid
/// lengths.
///
/// `mask[[t, b]]` is true when position `t` lies at or beyond sequence
/// `b`'s valid length, so each column is monotonic: once a position is
/// masked, every later position in that sequence is masked too. The mask
/// is cheap and batch-specific; build a fresh one per batch.
pub fn padding_mask(lengths: &[usize], max_len: usize) -> Array2<bool> {
    Array2::from_shape_fn((max_len, lengths.len()), |(t, b)| t >= lengths[b])
}
