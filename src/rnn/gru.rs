//! Gated recurrent unit cell

use ndarray::{s, Array1, Array2, ArrayView2, ArrayViewD};

use crate::rnn::cell::{sigmoid, sin_init2, zeros1};

/// GRU transition with fused gate pre-activations laid out `r|z|n`.
///
/// The reset gate couples into the hidden-side pre-activation of the
/// candidate, so the hidden contribution must stay separate from the input
/// contribution until the gates are formed:
///
/// ```text
/// r = sigmoid(Wr x + br + Ur h + cr)
/// z = sigmoid(Wz x + bz + Uz h + cz)
/// n = tanh(Wn x + bn + r * (Un h + cn))
/// h' = (1 - z) * n + z * h
/// ```
#[derive(Debug)]
pub struct GruCell {
    w_ih: Array2<f32>,
    w_hh: Array2<f32>,
    b_ih: Array1<f32>,
    b_hh: Array1<f32>,
    input_size: usize,
    hidden_size: usize,
}

impl GruCell {
    pub fn new(input_size: usize, hidden_size: usize, layer_idx: usize) -> Self {
        let scale = (1.0 / hidden_size as f32).sqrt();
        let phase = 0.123 + 0.017 * layer_idx as f32;
        Self {
            w_ih: sin_init2(3 * hidden_size, input_size, phase, scale),
            w_hh: sin_init2(3 * hidden_size, hidden_size, phase + 0.1, scale),
            b_ih: zeros1(3 * hidden_size),
            b_hh: zeros1(3 * hidden_size),
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

    /// One unmasked transition: `x` is `[B, input_size]`, `h` is `[B, H]`
    pub fn transition(&self, x: ArrayView2<'_, f32>, h: &Array2<f32>) -> Array2<f32> {
        let hs = self.hidden_size;
        let mut gi = x.dot(&self.w_ih.t());
        gi += &self.b_ih;
        let mut gh = h.dot(&self.w_hh.t());
        gh += &self.b_hh;

        let r = (&gi.slice(s![.., ..hs]) + &gh.slice(s![.., ..hs])).mapv(sigmoid);
        let z = (&gi.slice(s![.., hs..2 * hs]) + &gh.slice(s![.., hs..2 * hs])).mapv(sigmoid);
        let n = (&gi.slice(s![.., 2 * hs..]) + &(&r * &gh.slice(s![.., 2 * hs..]))).mapv(f32::tanh);

        let mut new_h = z.mapv(|v| 1.0 - v);
        new_h *= &n;
        new_h += &(&z * h);
        new_h
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

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_transition_shape() {
        let cell = GruCell::new(4, 6, 0);
        let x = Array2::from_elem((3, 4), 0.5);
        let h = Array2::zeros((3, 6));
        let new_h = cell.transition(x.view(), &h);
        assert_eq!(new_h.dim(), (3, 6));
        assert!(new_h.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_zero_input_zero_state_stays_bounded() {
        let cell = GruCell::new(4, 6, 0);
        let x = Array2::zeros((2, 4));
        let h = Array2::zeros((2, 6));
        let new_h = cell.transition(x.view(), &h);
        // gates saturate in (-1, 1) through tanh and sigmoid blending
        assert!(new_h.iter().all(|&v| v.abs() < 1.0));
    }

    #[test]
    fn test_transition_is_deterministic() {
        let cell = GruCell::new(4, 6, 1);
        let x = Array2::from_elem((2, 4), 0.3);
        let h = Array2::from_elem((2, 6), -0.2);
        assert_eq!(cell.transition(x.view(), &h), cell.transition(x.view(), &h));
    }

    #[test]
    fn test_batch_rows_are_independent() {
        let cell = GruCell::new(3, 5, 0);
        let x = Array2::from_shape_fn((2, 3), |(b, j)| (b * 3 + j) as f32 * 0.1);
        let h = Array2::zeros((2, 5));
        let full = cell.transition(x.view(), &h);

        let x0 = x.slice(s![0..1, ..]);
        let h0 = Array2::zeros((1, 5));
        let row0 = cell.transition(x0, &h0);
        for j in 0..5 {
            assert_eq!(full[[0, j]], row0[[0, j]]);
        }
    }

    #[test]
    fn test_parameter_shapes() {
        let cell = GruCell::new(4, 6, 0);
        let params = cell.parameters();
        assert_eq!(params.len(), 4);
        assert_eq!(params[0].1.shape(), &[18, 4]);
        assert_eq!(params[1].1.shape(), &[18, 6]);
        assert_eq!(params[2].1.shape(), &[18]);
    }
}
