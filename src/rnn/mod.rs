//! Padding-aware stacked recurrent encoder
//!
//! The cell family is a tagged variant over "state container + transition
//! function": [`cell::LayerState`] holds one (`Gru`) or two (`Lstm`) `[B, H]`
//! tensors, and [`cell::RecurrentCell`] dispatches the transition. The
//! stacking, masking, and dropout logic in [`stacked::StackedRnn`] is
//! written once against that abstraction, and the full-sequence and
//! single-step paths share a single per-timestep transition so they cannot
//! drift apart.

pub mod cell;
pub mod gru;
pub mod lstm;
pub mod stacked;

pub use cell::{masked_select, LayerState, RecurrentCell};
pub use gru::GruCell;
pub use lstm::LstmCell;
pub use stacked::{Mode, RnnState, StackedRnn};
