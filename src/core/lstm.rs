//! LSTM cell.
//!
//! ```text
//! [i, f, g, o] = W_ih · x + W_hh · h + b
//! c' = σ(f) ⊙ c + σ(i) ⊙ tanh(g)
//! h' = σ(o) ⊙ tanh(c')
//! ```

use anyhow::{bail, Result};
use ndarray::{s, Array1, Array2, ArrayView1};
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

use super::params::ParamGroup;
use super::state::LstmState;

/// Weights for one LSTM layer.  Gate order is input, forget, cell, output.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LstmCell {
    /// W_ih ∈ R^{4H × in}
    pub w_ih: Array2<f32>,

    /// W_hh ∈ R^{4H × H}
    pub w_hh: Array2<f32>,

    /// b ∈ R^{4H}
    pub bias: Array1<f32>,

    pub hidden_size: usize,
}

impl LstmCell {
    pub fn zeros(input_size: usize, hidden_size: usize) -> Self {
        Self {
            w_ih: Array2::zeros((4 * hidden_size, input_size)),
            w_hh: Array2::zeros((4 * hidden_size, hidden_size)),
            bias: Array1::zeros(4 * hidden_size),
            hidden_size,
        }
    }

    /// Uniform(−1/√H, 1/√H) initialisation for every weight and bias.
    pub fn new<R: Rng>(input_size: usize, hidden_size: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (hidden_size.max(1) as f32).sqrt();
        let dist = Uniform::new_inclusive(-bound, bound);
        Self {
            w_ih: Array2::from_shape_fn((4 * hidden_size, input_size), |_| dist.sample(rng)),
            w_hh: Array2::from_shape_fn((4 * hidden_size, hidden_size), |_| dist.sample(rng)),
            bias: Array1::from_shape_fn(4 * hidden_size, |_| dist.sample(rng)),
            hidden_size,
        }
    }

    pub fn input_size(&self) -> usize {
        self.w_ih.ncols()
    }

    /// One time step.  Updates `state` in place and returns the new hidden
    /// output.
    pub fn forward_step(&self, x: &Array1<f32>, state: &mut LstmState) -> Array1<f32> {
        let hsz = self.hidden_size;
        let gates = self.w_ih.dot(x) + self.w_hh.dot(&state.h) + &self.bias;

        let i = gates.slice(s![0..hsz]).mapv(sigmoid);
        let f = gates.slice(s![hsz..2 * hsz]).mapv(sigmoid);
        let g = gates.slice(s![2 * hsz..3 * hsz]).mapv(f32::tanh);
        let o = gates.slice(s![3 * hsz..4 * hsz]).mapv(sigmoid);

        let c = &f * &state.c + &i * &g;
        let h = &o * &c.mapv(f32::tanh);

        state.c = c;
        state.h = h.clone();
        h
    }

    pub fn check_shape(&self, name: &str, input_size: usize, hidden_size: usize) -> Result<()> {
        if self.hidden_size != hidden_size
            || self.w_ih.dim() != (4 * hidden_size, input_size)
            || self.w_hh.dim() != (4 * hidden_size, hidden_size)
            || self.bias.len() != 4 * hidden_size
        {
            bail!(
                "shape mismatch for {}: expected input {} hidden {}, found w_ih {:?} w_hh {:?}",
                name,
                input_size,
                hidden_size,
                self.w_ih.dim(),
                self.w_hh.dim()
            );
        }
        Ok(())
    }
}

impl ParamGroup for LstmCell {
    fn param_count(&self) -> usize {
        self.w_ih.len() + self.w_hh.len() + self.bias.len()
    }

    fn flatten(&self) -> Array1<f32> {
        self.w_ih
            .iter()
            .chain(self.w_hh.iter())
            .chain(self.bias.iter())
            .copied()
            .collect()
    }

    fn assign(&mut self, flat: ArrayView1<f32>) -> Result<()> {
        if flat.len() != self.param_count() {
            bail!(
                "lstm cell expects {} parameters, got {}",
                self.param_count(),
                flat.len()
            );
        }
        let mut it = flat.iter();
        for (w, &v) in self
            .w_ih
            .iter_mut()
            .chain(self.w_hh.iter_mut())
            .chain(self.bias.iter_mut())
            .zip(&mut it)
        {
            *w = v;
        }
        Ok(())
    }
}

pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_zero_weights_halve_cell() {
        // all gates at σ(0) = 0.5, g = tanh(0) = 0 → c' = 0.5·c
        let cell = LstmCell::zeros(3, 4);
        let mut state = LstmState::new(4);
        state.c.fill(2.0);
        let h = cell.forward_step(&Array1::ones(3), &mut state);
        assert!(state.c.iter().all(|&v| (v - 1.0).abs() < 1e-6));
        let expected = 0.5 * 1.0f32.tanh();
        assert!(h.iter().all(|&v| (v - expected).abs() < 1e-6));
    }

    #[test]
    fn test_output_bounded() {
        let mut rng = StdRng::seed_from_u64(3);
        let cell = LstmCell::new(5, 8, &mut rng);
        let mut state = LstmState::new(8);
        for _ in 0..20 {
            let h = cell.forward_step(&Array1::from_elem(5, 10.0), &mut state);
            assert!(h.iter().all(|v| v.abs() < 1.0));
        }
        assert!(state.is_healthy());
    }

    #[test]
    fn test_param_count() {
        let cell = LstmCell::zeros(5, 8);
        assert_eq!(cell.param_count(), 32 * 5 + 32 * 8 + 32);
        assert_eq!(cell.flatten().len(), cell.param_count());
    }

    #[test]
    fn test_check_shape() {
        let cell = LstmCell::zeros(5, 8);
        assert!(cell.check_shape("lstm_0", 5, 8).is_ok());
        assert!(cell.check_shape("lstm_0", 6, 8).is_err());
    }
}
