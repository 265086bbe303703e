//! Cell state container, transition dispatch, and the masked-state-selection
//! primitive shared by every layer and timestep

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::config::CellType;
use crate::error::{ModelError, Result};
use crate::rnn::{GruCell, LstmCell};

/// Per-layer hidden state
///
/// GRU layers carry a single `[B, H]` tensor; LSTM layers carry the paired
/// hidden/cell tensors. `output()` is the tensor fed to the next layer.
#[derive(Debug, Clone)]
pub enum LayerState {
    Gru(Array2<f32>),
    Lstm { h: Array2<f32>, c: Array2<f32> },
}

impl LayerState {
    /// The tensor visible to the next layer (and the encoder output)
    pub fn output(&self) -> &Array2<f32> {
        match self {
            LayerState::Gru(h) => h,
            LayerState::Lstm { h, .. } => h,
        }
    }

    pub fn batch(&self) -> usize {
        self.output().nrows()
    }

    pub fn hidden(&self) -> usize {
        self.output().ncols()
    }

    pub fn cell_type(&self) -> CellType {
        match self {
            LayerState::Gru(_) => CellType::Gru,
            LayerState::Lstm { .. } => CellType::Lstm,
        }
    }
}

/// Keep `old` on rows the mask marks as padding, take `candidate` elsewhere.
///
/// Applied uniformly at every layer and every timestep, so a padded
/// position never propagates a transition-derived update at any depth.
pub fn masked_select(
    mask_t: ArrayView1<'_, bool>,
    old: &LayerState,
    candidate: LayerState,
) -> LayerState {
    match (old, candidate) {
        (LayerState::Gru(old_h), LayerState::Gru(h)) => LayerState::Gru(blend(mask_t, old_h, h)),
        (LayerState::Lstm { h: old_h, c: old_c }, LayerState::Lstm { h, c }) => LayerState::Lstm {
            h: blend(mask_t, old_h, h),
            c: blend(mask_t, old_c, c),
        },
        // kinds are validated before any transition runs
        (_, candidate) => candidate,
    }
}

fn blend(mask_t: ArrayView1<'_, bool>, old: &Array2<f32>, mut candidate: Array2<f32>) -> Array2<f32> {
    for (b, &padded) in mask_t.iter().enumerate() {
        if padded {
            candidate.row_mut(b).assign(&old.row(b));
        }
    }
    candidate
}

/// One recurrent layer, polymorphic over the cell family
#[derive(Debug)]
pub enum RecurrentCell {
    Gru(GruCell),
    Lstm(LstmCell),
}

impl RecurrentCell {
    pub fn new(cell: CellType, input_size: usize, hidden_size: usize, layer_idx: usize) -> Self {
        match cell {
            CellType::Gru => RecurrentCell::Gru(GruCell::new(input_size, hidden_size, layer_idx)),
            CellType::Lstm => RecurrentCell::Lstm(LstmCell::new(input_size, hidden_size, layer_idx)),
        }
    }

    pub fn cell_type(&self) -> CellType {
        match self {
            RecurrentCell::Gru(_) => CellType::Gru,
            RecurrentCell::Lstm(_) => CellType::Lstm,
        }
    }

    pub fn input_size(&self) -> usize {
        match self {
            RecurrentCell::Gru(cell) => cell.input_size(),
            RecurrentCell::Lstm(cell) => cell.input_size(),
        }
    }

    pub fn hidden_size(&self) -> usize {
        match self {
            RecurrentCell::Gru(cell) => cell.hidden_size(),
            RecurrentCell::Lstm(cell) => cell.hidden_size(),
        }
    }

    /// Zero state for the start of a sequence
    pub fn zero_state(&self, batch: usize) -> LayerState {
        let zeros = Array2::zeros((batch, self.hidden_size()));
        match self {
            RecurrentCell::Gru(_) => LayerState::Gru(zeros),
            RecurrentCell::Lstm(_) => LayerState::Lstm {
                h: zeros.clone(),
                c: zeros,
            },
        }
    }

    /// Candidate next state from one unmasked transition
    pub fn transition(&self, x: ArrayView2<'_, f32>, state: &LayerState) -> Result<LayerState> {
        match (self, state) {
            (RecurrentCell::Gru(cell), LayerState::Gru(h)) => {
                Ok(LayerState::Gru(cell.transition(x, h)))
            }
            (RecurrentCell::Lstm(cell), LayerState::Lstm { h, c }) => {
                let (h, c) = cell.transition(x, h, c);
                Ok(LayerState::Lstm { h, c })
            }
            (_, state) => Err(ModelError::shape(
                "recurrent state",
                format!("{:?} state", self.cell_type()),
                format!("{:?} state", state.cell_type()),
            )),
        }
    }

    pub fn parameters(&self) -> Vec<(String, ndarray::ArrayViewD<'_, f32>)> {
        match self {
            RecurrentCell::Gru(cell) => cell.parameters(),
            RecurrentCell::Lstm(cell) => cell.parameters(),
        }
    }
}

/// Deterministic small-magnitude matrix initialization
pub(crate) fn sin_init2(rows: usize, cols: usize, phase: f32, scale: f32) -> Array2<f32> {
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        ((i * cols + j) as f32 * phase).sin() * scale
    })
}

pub(crate) fn zeros1(len: usize) -> Array1<f32> {
    Array1::zeros(len)
}

pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
