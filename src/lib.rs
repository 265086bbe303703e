//! recurrente - recurrent language model core
//!
//! A padding-aware stacked recurrent network for next-token prediction:
//!
//! - [`Embedding`] - token id lookup
//! - [`mask::padding_mask`] - time-major monotonic padding mask
//! - [`StackedRnn`] - masked GRU/LSTM stack with a full-sequence path and
//!   a single-step path sharing one transition implementation
//! - [`softmax::Projection`] - flat or adaptive clustered log-softmax
//! - [`LabelSmoothingLoss`] - smoothed cross-entropy with ignore handling
//! - [`RnnLm`] - the wrapper exposing `train_forward` and `infer_step`
//!
//! The core is pure: no I/O, no background threads, no state retained
//! across calls. Hidden state is created by [`RnnLm::initial_state`] and
//! owned by the caller between steps.
//!
//! # Example
//!
//! ```
//! use ndarray::array;
//! use recurrente::{RnnLm, RnnLmConfig};
//!
//! let config = RnnLmConfig::tiny().with_smoothing(0.1);
//! let model = RnnLm::new(config).unwrap();
//!
//! let input = array![[1u32, 2, 3, 0, 0], [4, 5, 6, 7, 8]];
//! let labels = array![[2i64, 3, -1, -1, -1], [5, 6, 7, 8, -1]];
//! let out = model
//!     .train_forward(input.view(), &[3, 5], labels.view(), &[3, 5])
//!     .unwrap();
//! assert!(out.loss.is_finite() && out.loss >= 0.0);
//!
//! let mut state = model.initial_state(1);
//! let step = array![[1u32]];
//! let (log_probs, next) = model.infer_step(step.view(), &[1], &state).unwrap();
//! assert_eq!(log_probs.dim(), (1, 1, 10));
//! state = next;
//! let _ = state;
//! ```

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod loss;
pub mod mask;
pub mod model;
pub mod rnn;
pub mod softmax;
pub mod trace;

pub use config::{CellType, RnnLmConfig};
pub use embedding::Embedding;
pub use error::{ModelError, Result};
pub use loss::LabelSmoothingLoss;
pub use model::{LmOutput, RnnLm};
pub use rnn::{Mode, RnnState, StackedRnn};
