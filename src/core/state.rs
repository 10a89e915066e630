//! Per-sequence recurrent and alignment state.
//!
//! Both states belong to exactly one in-flight sequence.  They start at zero
//! and are threaded explicitly through every step call.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Hidden and cell vectors of one LSTM layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LstmState {
    pub h: Array1<f32>,
    pub c: Array1<f32>,
}

impl LstmState {
    pub fn new(hidden_size: usize) -> Self {
        Self {
            h: Array1::zeros(hidden_size),
            c: Array1::zeros(hidden_size),
        }
    }

    pub fn reset(&mut self) {
        self.h.fill(0.0);
        self.c.fill(0.0);
    }

    /// Check the state has not diverged (NaN or Inf).
    pub fn is_healthy(&self) -> bool {
        self.h.iter().chain(self.c.iter()).all(|v| v.is_finite())
    }
}

/// States of every layer in a recurrent stack.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecurrentState {
    pub layers: Vec<LstmState>,

    /// Number of steps processed since the last reset.
    pub steps: u64,
}

impl RecurrentState {
    pub fn new(n_layers: usize, hidden_size: usize) -> Self {
        Self {
            layers: (0..n_layers).map(|_| LstmState::new(hidden_size)).collect(),
            steps: 0,
        }
    }

    pub fn reset(&mut self) {
        for l in &mut self.layers {
            l.reset();
        }
        self.steps = 0;
    }

    pub fn all_healthy(&self) -> bool {
        self.layers.iter().all(|l| l.is_healthy())
    }

    /// Serialise all layers.
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("RecurrentState serialisation should not fail")
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Running position of the attention window.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlignmentState {
    /// Per-mixture position into the character sequence.  Never decreases.
    pub kappa: Array1<f32>,

    /// Last window vector, fed to layer 0 on the next step.
    pub window: Array1<f32>,

    /// Mixture importances from the last step.
    pub alpha: Array1<f32>,

    /// Finish flag from the last step.
    pub finish: bool,
}

impl AlignmentState {
    pub fn new(num_mixtures: usize, vocab_size: usize) -> Self {
        Self {
            kappa: Array1::zeros(num_mixtures),
            window: Array1::zeros(vocab_size),
            alpha: Array1::zeros(num_mixtures),
            finish: false,
        }
    }

    pub fn reset(&mut self) {
        self.kappa.fill(0.0);
        self.window.fill(0.0);
        self.alpha.fill(0.0);
        self.finish = false;
    }

    /// Zero only the position, keeping the window context.
    pub fn reset_position(&mut self) {
        self.kappa.fill(0.0);
        self.finish = false;
    }

    /// Kappa of the mixture with the largest alpha.
    pub fn dominant_position(&self) -> f32 {
        dominant_position(&self.alpha, &self.kappa)
    }

    pub fn is_healthy(&self) -> bool {
        self.kappa
            .iter()
            .chain(self.window.iter())
            .chain(self.alpha.iter())
            .all(|v| v.is_finite())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("AlignmentState serialisation should not fail")
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

pub(crate) fn dominant_position(alpha: &Array1<f32>, kappa: &Array1<f32>) -> f32 {
    let mut best = 0;
    for (m, &a) in alpha.iter().enumerate() {
        if a > alpha[best] {
            best = m;
        }
    }
    kappa.get(best).copied().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_init() {
        let state = RecurrentState::new(3, 8);
        assert_eq!(state.layers.len(), 3);
        assert_eq!(state.layers[0].h.len(), 8);
        assert_eq!(state.steps, 0);
        assert!(state.all_healthy());
    }

    #[test]
    fn test_reset() {
        let mut state = RecurrentState::new(2, 4);
        state.layers[1].c.fill(3.0);
        state.steps = 9;
        state.reset();
        assert_eq!(state.steps, 0);
        assert!(state.layers[1].c.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_unhealthy_detected() {
        let mut state = RecurrentState::new(1, 2);
        state.layers[0].h[1] = f32::NAN;
        assert!(!state.all_healthy());
    }

    #[test]
    fn test_serialisation_roundtrip() {
        let mut state = RecurrentState::new(2, 3);
        state.layers[0].h[2] = 0.25;
        state.steps = 4;
        let restored = RecurrentState::from_bytes(&state.to_bytes()).unwrap();
        assert_eq!(restored.steps, 4);
        assert!((restored.layers[0].h[2] - 0.25).abs() < 1e-8);

        let mut align = AlignmentState::new(2, 5);
        align.kappa[1] = 1.5;
        let restored = AlignmentState::from_bytes(&align.to_bytes()).unwrap();
        assert_eq!(restored.kappa[1], 1.5);
    }

    #[test]
    fn test_dominant_position() {
        let mut align = AlignmentState::new(3, 4);
        align.kappa = Array1::from_vec(vec![1.0, 2.0, 3.0]);
        align.alpha = Array1::from_vec(vec![0.1, 0.9, 0.2]);
        assert_eq!(align.dominant_position(), 2.0);
        align.reset_position();
        assert_eq!(align.dominant_position(), 0.0);
    }
}
