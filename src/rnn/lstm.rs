//! Long short-term memory cell

use ndarray::{s, Array1, Array2, ArrayView2, ArrayViewD};

use crate::rnn::cell::{sigmoid, sin_init2, zeros1};

/// LSTM transition with fused gate pre-activations laid out `i|f|g|o`:
///
/// ```text
/// i, f, o = sigmoid(W x + U h + b)   (per gate slice)
/// g = tanh(Wg x + Ug h + bg)
/// c' = f * c + i * g
/// h' = o * tanh(c')
/// ```
#[derive(Debug)]
pub struct LstmCell {
    w_ih: Array2<f32>,
    w_hh: Array2<f32>,
    b_ih: Array1<f32>,
    b_hh: Array1<f32>,
    input_size: usize,
    hidden_size: usize,
}

impl LstmCell {
    pub fn new(input_size: usize, hidden_size: usize, layer_idx: usize) -> Self {
        let scale = (1.0 / hidden_size as f32).sqrt();
        let phase = 0.219 + 0.017 * layer_idx as f32;
        Self {
            w_ih: sin_init2(4 * hidden_size, input_size, phase, scale),
            w_hh: sin_init2(4 * hidden_size, hidden_size, phase + 0.1, scale),
            b_ih: zeros1(4 * hidden_size),
            b_hh: zeros1(4 * hidden_size),
            input_size,
            hidden_size,
        }
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// One unmasked transition over the paired `(h, c)` state
    pub fn transition(
        &self,
        x: ArrayView2<'_, f32>,
        h: &Array2<f32>,
        c: &Array2<f32>,
    ) -> (Array2<f32>, Array2<f32>) {
        let hs = self.hidden_size;
        let mut gates = x.dot(&self.w_ih.t());
        gates += &self.b_ih;
        gates += &h.dot(&self.w_hh.t());
        gates += &self.b_hh;

        let i = gates.slice(s![.., ..hs]).mapv(sigmoid);
        let f = gates.slice(s![.., hs..2 * hs]).mapv(sigmoid);
        let g = gates.slice(s![.., 2 * hs..3 * hs]).mapv(f32::tanh);
        let o = gates.slice(s![.., 3 * hs..]).mapv(sigmoid);

        let mut new_c = f;
        new_c *= c;
        new_c += &(&i * &g);
        let new_h = &o * &new_c.mapv(f32::tanh);
        (new_h, new_c)
    }

    pub fn parameters(&self) -> Vec<(String, ArrayViewD<'_, f32>)> {
        vec![
            ("w_ih".to_string(), self.w_ih.view().into_dyn()),
            ("w_hh".to_string(), self.w_hh.view().into_dyn()),
            ("b_ih".to_string(), self.b_ih.view().into_dyn()),
            ("b_hh".to_string(), self.b_hh.view().into_dyn()),
        ]
    }
}
