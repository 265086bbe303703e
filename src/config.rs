//! Model configuration
//!
//! [`RnnLmConfig`] carries every hyperparameter of the language model:
//! vocabulary and layer sizes, the recurrent cell family, the adaptive
//! softmax partition, and the loss settings. Validation happens once, in
//! [`RnnLmConfig::validate`], which [`crate::RnnLm::new`] calls before any
//! weight is allocated.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Recurrent cell family used by every layer of the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    /// Single-state gated recurrent unit
    Gru,
    /// Paired hidden/cell state LSTM
    Lstm,
}

/// Configuration for the recurrent language model
///
/// # Example
///
/// ```
/// use recurrente::{CellType, RnnLmConfig};
///
/// let config = RnnLmConfig::new(1000, 64, 128)
///     .with_layers(2)
///     .with_cell(CellType::Lstm)
///     .with_adaptive(vec![200, 600], 2.0)
///     .with_smoothing(0.1);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RnnLmConfig {
    /// Vocabulary size (token ids live in `[0, vocab_size)`)
    pub vocab_size: usize,
    /// Number of stacked recurrent layers
    pub num_layers: usize,
    /// Embedding dimension fed to the first layer
    pub input_size: usize,
    /// Hidden dimension of every recurrent layer
    pub hidden_size: usize,
    /// Cell family shared by all layers
    pub cell: CellType,
    /// Inter-layer dropout rate, applied in training mode only
    pub dropout: f32,
    /// Use the clustered output layer instead of a flat projection
    pub adaptive_softmax: bool,
    /// Tail-cluster boundaries, strictly increasing and below `vocab_size`
    pub cutoffs: Vec<usize>,
    /// Per-depth divisor for tail projection widths
    pub div_value: f32,
    /// Label-smoothing weight epsilon
    pub smoothing: f32,
    /// Average the loss over scored tokens instead of batch size
    pub length_normalized: bool,
    /// Label value excluded from loss and perplexity
    pub ignore_id: i64,
    /// Seed for the dropout noise generator
    pub seed: u64,
}

impl RnnLmConfig {
    /// Create a configuration with one GRU layer and a flat output layer
    pub fn new(vocab_size: usize, input_size: usize, hidden_size: usize) -> Self {
        Self {
            vocab_size,
            num_layers: 1,
            input_size,
            hidden_size,
            cell: CellType::Gru,
            dropout: 0.0,
            adaptive_softmax: false,
            cutoffs: Vec::new(),
            div_value: 2.0,
            smoothing: 0.0,
            length_normalized: false,
            ignore_id: -1,
            seed: 0,
        }
    }

    /// Tiny configuration for tests
    pub fn tiny() -> Self {
        Self::new(10, 4, 6)
    }

    /// Set the number of stacked layers
    pub fn with_layers(mut self, num_layers: usize) -> Self {
        self.num_layers = num_layers;
        self
    }

    /// Set the cell family
    pub fn with_cell(mut self, cell: CellType) -> Self {
        self.cell = cell;
        self
    }

    /// Set the inter-layer dropout rate
    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    /// Enable the adaptive output layer with the given partition
    pub fn with_adaptive(mut self, cutoffs: Vec<usize>, div_value: f32) -> Self {
        self.adaptive_softmax = true;
        self.cutoffs = cutoffs;
        self.div_value = div_value;
        self
    }

    /// Set the label-smoothing weight
    pub fn with_smoothing(mut self, smoothing: f32) -> Self {
        self.smoothing = smoothing;
        self
    }

    /// Normalize loss and perplexity by token count instead of batch size
    pub fn with_length_normalized(mut self, normalized: bool) -> Self {
        self.length_normalized = normalized;
        self
    }

    /// Set the ignored label id
    pub fn with_ignore_id(mut self, ignore_id: i64) -> Self {
        self.ignore_id = ignore_id;
        self
    }

    /// Set the dropout noise seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Check every invariant the model constructors rely on
    pub fn validate(&self) -> Result<()> {
        if self.vocab_size < 2 {
            return Err(ModelError::Config(format!(
                "vocab_size must be at least 2, got {}",
                self.vocab_size
            )));
        }
        if self.num_layers == 0 {
            return Err(ModelError::Config("num_layers must be positive".into()));
        }
        if self.input_size == 0 || self.hidden_size == 0 {
            return Err(ModelError::Config(format!(
                "input_size and hidden_size must be positive, got {} and {}",
                self.input_size, self.hidden_size
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ModelError::Config(format!(
                "dropout must lie in [0, 1), got {}",
                self.dropout
            )));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(ModelError::Config(format!(
                "smoothing must lie in [0, 1), got {}",
                self.smoothing
            )));
        }
        if self.adaptive_softmax {
            validate_cutoffs(&self.cutoffs, self.vocab_size)?;
            if !(self.div_value > 0.0 && self.div_value.is_finite()) {
                return Err(ModelError::Config(format!(
                    "div_value must be positive and finite, got {}",
                    self.div_value
                )));
            }
        }
        Ok(())
    }
}

/// Check the adaptive partition: non-empty, strictly increasing, within vocab
pub(crate) fn validate_cutoffs(cutoffs: &[usize], vocab_size: usize) -> Result<()> {
    if cutoffs.is_empty() {
        return Err(ModelError::Config(
            "adaptive softmax requires at least one cutoff".into(),
        ));
    }
    if cutoffs[0] == 0 {
        return Err(ModelError::Config("first cutoff must be positive".into()));
    }
    for pair in cutoffs.windows(2) {
        if pair[1] <= pair[0] {
            return Err(ModelError::Config(format!(
                "cutoffs must be strictly increasing, got {pair:?}"
            )));
        }
    }
    if let Some(&last) = cutoffs.last() {
        if last >= vocab_size {
            return Err(ModelError::Config(format!(
                "last cutoff {last} must be below vocab_size {vocab_size}"
            )));
        }
    }
    Ok(())
}
