//! Stacked masked recurrence
//!
//! [`StackedRnn`] runs a batch through every layer with per-timestep
//! masking: a candidate state is computed by the cell's transition, then
//! [`masked_select`] keeps the previous state on padded rows. The
//! full-sequence path and the single-step path both call the one private
//! [`StackedRnn::advance`] function, so T chained `step` calls reproduce
//! `encode_sequence` exactly.

use ndarray::{s, Array2, Array3, ArrayView1, ArrayView2, ArrayViewD};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::config::CellType;
use crate::error::{ModelError, Result};
use crate::rnn::cell::{masked_select, LayerState, RecurrentCell};

/// Whether inter-layer dropout noise is drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Dropout active between layers
    Train,
    /// Deterministic; the only mode the step path has
    Eval,
}

/// Full encoder state: one [`LayerState`] per layer, owned by the caller
/// between `step` calls
#[derive(Debug, Clone)]
pub struct RnnState {
    layers: Vec<LayerState>,
}

impl RnnState {
    pub fn layers(&self) -> &[LayerState] {
        &self.layers
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn batch(&self) -> usize {
        self.layers.first().map_or(0, LayerState::batch)
    }
}

/// Stack of recurrent layers sharing one cell family
pub struct StackedRnn {
    layers: Vec<RecurrentCell>,
    cell: CellType,
    dropout: f32,
    seed: u64,
    input_size: usize,
    hidden_size: usize,
}

impl StackedRnn {
    /// Build the stack; the first layer maps `input_size -> hidden_size`,
    /// deeper layers map `hidden_size -> hidden_size`
    pub fn new(
        cell: CellType,
        input_size: usize,
        hidden_size: usize,
        num_layers: usize,
        dropout: f32,
        seed: u64,
    ) -> Result<Self> {
        if num_layers == 0 {
            return Err(ModelError::Config("num_layers must be positive".into()));
        }
        if input_size == 0 || hidden_size == 0 {
            return Err(ModelError::Config(
                "input_size and hidden_size must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&dropout) {
            return Err(ModelError::Config(format!(
                "dropout must lie in [0, 1), got {dropout}"
            )));
        }
        let layers = (0..num_layers)
            .map(|idx| {
                let in_size = if idx == 0 { input_size } else { hidden_size };
                RecurrentCell::new(cell, in_size, hidden_size, idx)
            })
            .collect();
        Ok(Self {
            layers,
            cell,
            dropout,
            seed,
            input_size,
            hidden_size,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn cell_type(&self) -> CellType {
        self.cell
    }

    /// Zero-initialized state for a fresh batch
    pub fn zero_state(&self, batch: usize) -> RnnState {
        RnnState {
            layers: self.layers.iter().map(|l| l.zero_state(batch)).collect(),
        }
    }

    /// Process a full time-major sequence through every layer
    ///
    /// # Arguments
    /// * `input` - embedded tokens, `[T, B, input_size]`
    /// * `mask` - padding mask, `[T, B]`, true on padded positions
    /// * `initial` - carried-in state, or zeros when `None`
    /// * `mode` - `Train` draws inter-layer dropout noise, `Eval` does not
    ///
    /// # Returns
    /// Top-layer outputs `[T, B, hidden_size]` and the final state. On a
    /// padded timestep a sequence's state (and therefore its output row)
    /// is exactly its state at the last valid position.
    pub fn encode_sequence(
        &self,
        input: &Array3<f32>,
        mask: &Array2<bool>,
        initial: Option<&RnnState>,
        mode: Mode,
    ) -> Result<(Array3<f32>, RnnState)> {
        let (time, batch, features) = input.dim();
        if features != self.input_size {
            return Err(ModelError::shape(
                "encoder input",
                format!("[T, B, {}]", self.input_size),
                format!("[{time}, {batch}, {features}]"),
            ));
        }
        if mask.dim() != (time, batch) {
            return Err(ModelError::shape(
                "padding mask",
                format!("[{time}, {batch}]"),
                format!("{:?}", mask.dim()),
            ));
        }
        let mut state = match initial {
            Some(state) => {
                self.validate_state(state, batch)?;
                state.clone()
            }
            None => self.zero_state(batch),
        };

        let mut rng = StdRng::seed_from_u64(self.seed);
        let dropout_active = mode == Mode::Train && self.dropout > 0.0;
        let mut output = Array3::zeros((time, batch, self.hidden_size));
        for t in 0..time {
            let (out_t, next) = self.advance(
                input.slice(s![t, .., ..]),
                mask.row(t),
                &state,
                if dropout_active { Some(&mut rng) } else { None },
            )?;
            output.slice_mut(s![t, .., ..]).assign(&out_t);
            state = next;
        }
        Ok((output, state))
    }

    /// Advance exactly one timestep with explicit state
    ///
    /// Threading the returned state back through repeated calls reproduces
    /// [`StackedRnn::encode_sequence`] over the same timesteps and mask.
    pub fn step(
        &self,
        input: ArrayView2<'_, f32>,
        mask_t: ArrayView1<'_, bool>,
        state: &RnnState,
    ) -> Result<(Array2<f32>, RnnState)> {
        let (batch, features) = input.dim();
        if features != self.input_size {
            return Err(ModelError::shape(
                "step input",
                format!("[B, {}]", self.input_size),
                format!("[{batch}, {features}]"),
            ));
        }
        if mask_t.len() != batch {
            return Err(ModelError::shape(
                "step mask",
                format!("[{batch}]"),
                format!("[{}]", mask_t.len()),
            ));
        }
        self.validate_state(state, batch)?;
        self.advance(input, mask_t, state, None)
    }

    /// The one shared per-timestep transition over all layers
    fn advance(
        &self,
        x_t: ArrayView2<'_, f32>,
        mask_t: ArrayView1<'_, bool>,
        state: &RnnState,
        mut rng: Option<&mut StdRng>,
    ) -> Result<(Array2<f32>, RnnState)> {
        let mut input = x_t.to_owned();
        let mut next = Vec::with_capacity(self.layers.len());
        let last = self.layers.len() - 1;
        for (idx, cell) in self.layers.iter().enumerate() {
            let candidate = cell.transition(input.view(), &state.layers[idx])?;
            let new_state = masked_select(mask_t, &state.layers[idx], candidate);
            input = new_state.output().clone();
            next.push(new_state);
            // dropout between layers only, never inside a cell's recurrence
            if idx < last {
                if let Some(rng) = rng.as_deref_mut() {
                    dropout_inplace(&mut input, self.dropout, rng);
                }
            }
        }
        Ok((input, RnnState { layers: next }))
    }

    /// Check a caller-provided state against the configured stack
    pub fn validate_state(&self, state: &RnnState, batch: usize) -> Result<()> {
        if state.num_layers() != self.layers.len() {
            return Err(ModelError::shape(
                "rnn state",
                format!("{} layers", self.layers.len()),
                format!("{} layers", state.num_layers()),
            ));
        }
        for layer in state.layers() {
            if layer.cell_type() != self.cell {
                return Err(ModelError::shape(
                    "rnn state",
                    format!("{:?} state", self.cell),
                    format!("{:?} state", layer.cell_type()),
                ));
            }
            if layer.batch() != batch || layer.hidden() != self.hidden_size {
                return Err(ModelError::shape(
                    "rnn state",
                    format!("[{batch}, {}]", self.hidden_size),
                    format!("[{}, {}]", layer.batch(), layer.hidden()),
                ));
            }
        }
        Ok(())
    }

    pub fn parameters(&self) -> Vec<(String, ArrayViewD<'_, f32>)> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(idx, cell)| {
                cell.parameters()
                    .into_iter()
                    .map(move |(name, view)| (format!("encoder.layer{idx}.{name}"), view))
            })
            .collect()
    }
}

/// Inverted dropout: zero with probability `rate`, scale survivors by
/// `1 / (1 - rate)` so the expected activation is unchanged
fn dropout_inplace(x: &mut Array2<f32>, rate: f32, rng: &mut StdRng) {
    let keep = 1.0 - rate;
    x.mapv_inplace(|v| if rng.gen::<f32>() < rate { 0.0 } else { v / keep });
}
