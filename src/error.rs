//! Error taxonomy for the model core
//!
//! Three kinds cover everything this crate can reject:
//!
//! - [`ModelError::ShapeMismatch`] - an input tensor's dimensions disagree
//!   with the configured sizes; raised at the call boundary, never papered
//!   over by broadcasting or truncation
//! - [`ModelError::Config`] - an invalid hyperparameter combination; raised
//!   at construction time, not at first call
//! - [`ModelError::DataRange`] - a token or label id outside the valid
//!   range; raised during forward/loss computation
//!
//! All of these indicate programming or data errors upstream, so they are
//! surfaced immediately to the caller. Nothing in this core retries or
//! recovers internally.

use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors produced by model construction and forward computation
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: &'static str,
        expected: String,
        actual: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{what} {value} outside valid range [0, {limit})")]
    DataRange {
        what: &'static str,
        value: i64,
        limit: usize,
    },
}

impl ModelError {
    /// Shorthand for a [`ModelError::ShapeMismatch`] with formatted sides
    pub fn shape(
        context: &'static str,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        ModelError::ShapeMismatch {
            context,
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
