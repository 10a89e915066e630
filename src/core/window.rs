//! Location-based attention window over the conditioning text.
//!
//! ```text
//! alpha, beta, Δkappa = exp(W · h + b)                 ∈ R^M, all > 0
//! kappa   = kappa_prev + Δkappa                         (monotone)
//! phi(u)  = Σ_m alpha_m · exp(−beta_m · (kappa_m − u)²)  u ∈ [0, L)
//! window  = Σ_u phi(u) · onehot(c_u)
//! finish  = phi(last valid) > max_{u < last} phi(u)
//! ```
//!
//! Padding positions receive no weight and are ignored by the finish test.

use anyhow::{bail, Result};
use ndarray::{Array1, ArrayView1};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::INIT_STD;
use crate::data::CharacterSequence;

use super::linear::Linear;
use super::params::{assign_all, flatten_all, ParamGroup};
use super::state::dominant_position;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttentionWindow {
    pub alpha: Linear,
    pub beta: Linear,
    pub kappa: Linear,
    pub num_mixtures: usize,
    pub vocab_size: usize,
}

/// Result of one window evaluation.
#[derive(Clone, Debug)]
pub struct WindowOutput {
    /// Alignment-weighted character vector, width `vocab_size`.
    pub window: Array1<f32>,

    /// Updated per-mixture position.
    pub kappa: Array1<f32>,

    /// Alignment weight for each character position, padding included.
    pub phi: Array1<f32>,

    /// Mixture importances.
    pub alpha: Array1<f32>,

    /// Attention has moved onto the last valid character.
    pub finish: bool,
}

impl WindowOutput {
    /// Kappa of the mixture with the largest alpha.
    pub fn dominant_position(&self) -> f32 {
        dominant_position(&self.alpha, &self.kappa)
    }
}

impl AttentionWindow {
    pub fn new<R: Rng>(hidden_size: usize, num_mixtures: usize, vocab_size: usize, rng: &mut R) -> Self {
        Self {
            alpha: Linear::truncated_normal(hidden_size, num_mixtures, INIT_STD, rng),
            beta: Linear::truncated_normal(hidden_size, num_mixtures, INIT_STD, rng),
            kappa: Linear::truncated_normal(hidden_size, num_mixtures, INIT_STD, rng),
            num_mixtures,
            vocab_size,
        }
    }

    pub fn forward(
        &self,
        h: &Array1<f32>,
        kappa_prev: &Array1<f32>,
        text: &CharacterSequence,
    ) -> Result<WindowOutput> {
        if kappa_prev.len() != self.num_mixtures {
            bail!(
                "kappa has {} mixtures, window expects {}",
                kappa_prev.len(),
                self.num_mixtures
            );
        }
        if text.vocab_size() != self.vocab_size {
            bail!(
                "text encoded over {} symbols, window expects {}",
                text.vocab_size(),
                self.vocab_size
            );
        }

        let alpha = self.alpha.forward(h).mapv(f32::exp);
        let beta = self.beta.forward(h).mapv(f32::exp);
        let kappa = kappa_prev + &self.kappa.forward(h).mapv(f32::exp);

        let valid = text.valid_len();
        let mut phi = Array1::<f32>::zeros(text.len());
        for u in 0..valid {
            let pos = u as f32;
            let mut acc = 0.0f32;
            for m in 0..self.num_mixtures {
                let d = kappa[m] - pos;
                acc += alpha[m] * (-beta[m] * d * d).exp();
            }
            phi[u] = acc;
        }

        let mut window = Array1::<f32>::zeros(self.vocab_size);
        for (u, &c) in text.indices()[..valid].iter().enumerate() {
            window[c] += phi[u];
        }

        let finish = finish_condition(phi.slice(ndarray::s![..valid]));

        Ok(WindowOutput {
            window,
            kappa,
            phi,
            alpha,
            finish,
        })
    }

    pub fn check_shape(&self, hidden_size: usize, num_mixtures: usize, vocab_size: usize) -> Result<()> {
        if self.num_mixtures != num_mixtures || self.vocab_size != vocab_size {
            bail!(
                "shape mismatch for window: expected {} mixtures over {} symbols, found {} over {}",
                num_mixtures,
                vocab_size,
                self.num_mixtures,
                self.vocab_size
            );
        }
        self.alpha.check_shape("window.alpha", hidden_size, num_mixtures)?;
        self.beta.check_shape("window.beta", hidden_size, num_mixtures)?;
        self.kappa.check_shape("window.kappa", hidden_size, num_mixtures)?;
        Ok(())
    }
}

/// Last valid weight strictly above every earlier weight.
fn finish_condition(phi: ArrayView1<f32>) -> bool {
    let n = phi.len();
    if n == 0 {
        return false;
    }
    let last = phi[n - 1];
    let earlier = phi
        .slice(ndarray::s![..n - 1])
        .iter()
        .copied()
        .fold(0.0f32, f32::max);
    last > earlier
}

impl ParamGroup for AttentionWindow {
    fn param_count(&self) -> usize {
        self.alpha.param_count() + self.beta.param_count() + self.kappa.param_count()
    }

    fn flatten(&self) -> Array1<f32> {
        flatten_all(&[&self.alpha, &self.beta, &self.kappa])
    }

    fn assign(&mut self, flat: ArrayView1<f32>) -> Result<()> {
        assign_all(&mut [&mut self.alpha, &mut self.beta, &mut self.kappa], flat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const VOCAB: usize = 6;

    fn window() -> AttentionWindow {
        let mut rng = StdRng::seed_from_u64(5);
        AttentionWindow::new(4, 3, VOCAB, &mut rng)
    }

    /// Window whose projections are all constant: alpha = beta = 1, Δkappa = e^{log step}.
    fn constant_window(step: f32) -> AttentionWindow {
        let mut w = AttentionWindow {
            alpha: Linear::zeros(4, 1),
            beta: Linear::zeros(4, 1),
            kappa: Linear::zeros(4, 1),
            num_mixtures: 1,
            vocab_size: VOCAB,
        };
        w.kappa.bias[0] = step.ln();
        w
    }

    fn text(ids: &[usize]) -> CharacterSequence {
        CharacterSequence::new(ids.to_vec(), VOCAB).unwrap()
    }

    #[test]
    fn test_kappa_monotone() {
        let w = window();
        let t = text(&[1, 2, 3, 4]);
        let mut kappa = Array1::zeros(3);
        for step in 0..20 {
            let h = Array1::from_elem(4, (step as f32 * 0.7).sin());
            let out = w.forward(&h, &kappa, &t).unwrap();
            for m in 0..3 {
                assert!(out.kappa[m] >= kappa[m]);
            }
            kappa = out.kappa;
        }
    }

    #[test]
    fn test_phi_non_negative_and_padding_zero() {
        let w = window();
        let t = CharacterSequence::padded(vec![1, 2, 3, 0, 0], 3, VOCAB).unwrap();
        let out = w.forward(&Array1::ones(4), &Array1::zeros(3), &t).unwrap();
        assert_eq!(out.phi.len(), 5);
        assert!(out.phi.iter().all(|&p| p >= 0.0));
        assert_eq!(out.phi[3], 0.0);
        assert_eq!(out.phi[4], 0.0);
    }

    #[test]
    fn test_window_is_phi_weighted_one_hot_sum() {
        let w = window();
        let t = text(&[2, 5, 2]);
        let out = w.forward(&Array1::ones(4), &Array1::zeros(3), &t).unwrap();
        assert!((out.window[2] - (out.phi[0] + out.phi[2])).abs() < 1e-6);
        assert!((out.window[5] - out.phi[1]).abs() < 1e-6);
        assert_eq!(out.window[0], 0.0);
        let total: f32 = out.window.sum();
        assert!((total - out.phi.sum()).abs() < 1e-5);
    }

    #[test]
    fn test_phi_peaks_at_kappa() {
        let w = constant_window(2.0);
        let t = text(&[1, 1, 1, 1, 1, 1]);
        let out = w.forward(&Array1::zeros(4), &Array1::zeros(1), &t).unwrap();
        assert!((out.kappa[0] - 2.0).abs() < 1e-5);
        assert!((out.phi[2] - 1.0).abs() < 1e-5);
        assert!(out.phi[2] > out.phi[1] && out.phi[2] > out.phi[3]);
        assert!(!out.finish);
    }

    #[test]
    fn test_finish_when_past_last_character() {
        let w = constant_window(1.0);
        let t = text(&[1, 2, 3, 3]);
        let mut kappa = Array1::zeros(1);
        let mut finished_at = None;
        for step in 1..=6 {
            let out = w.forward(&Array1::zeros(4), &kappa, &t).unwrap();
            kappa = out.kappa.clone();
            if out.finish && finished_at.is_none() {
                finished_at = Some(step);
            }
        }
        // kappa = step; phi(3) wins once kappa > 2.5
        assert_eq!(finished_at, Some(3));
    }

    #[test]
    fn test_finish_ignores_padding() {
        let w = constant_window(3.0);
        let t = CharacterSequence::padded(vec![1, 2, 3, 4, 0, 0, 0], 4, VOCAB).unwrap();
        let out = w.forward(&Array1::zeros(4), &Array1::zeros(1), &t).unwrap();
        assert!(out.finish);
    }

    #[test]
    fn test_rejects_mismatched_inputs() {
        let w = window();
        let t = text(&[1]);
        assert!(w.forward(&Array1::ones(4), &Array1::zeros(2), &t).is_err());
        let other = CharacterSequence::new(vec![1], VOCAB + 1).unwrap();
        assert!(w.forward(&Array1::ones(4), &Array1::zeros(3), &other).is_err());
    }

    #[test]
    fn test_param_roundtrip() {
        let w = window();
        let flat = w.flatten();
        assert_eq!(flat.len(), 3 * (4 * 3 + 3));
        let mut other = window();
        other.assign(Array1::zeros(flat.len()).view()).unwrap();
        assert!(other.alpha.weight.iter().all(|&v| v == 0.0));
        other.assign(flat.view()).unwrap();
        assert_eq!(other.beta.weight, w.beta.weight);
    }
}
