//! Mixture-density output head.
//!
//! ```text
//! e    = σ(W_e · h)                         end-of-stroke probability
//! pi   = softmax((W_pi · h) · (1 + bias))   component weights
//! mu   = W_mu · h                           component means
//! std  = exp(W_std · h − bias)              component spreads, > 0
//! rho  = tanh(W_rho · h)                    correlations, |rho| < 1
//! ```
//!
//! `bias` is zero during training and sharpens sampling at generation time.
//!
//! `std` never drops below `STD_FLOOR` (1e-6).  With the head's raw output
//! near zero the floor takes over once `bias` exceeds ln(1e6) ≈ 13.8; past
//! that point larger biases no longer narrow the components, only `pi`.

use anyhow::{bail, Result};
use ndarray::{Array1, ArrayView1};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{INIT_STD, RHO_LIMIT, STD_FLOOR};

use super::linear::Linear;
use super::lstm::sigmoid;
use super::params::{assign_all, flatten_all, ParamGroup};

/// Bivariate mixture plus Bernoulli pen-lift for one time step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MixtureParameters {
    pub e: f32,
    pub pi: Array1<f32>,
    pub mu1: Array1<f32>,
    pub mu2: Array1<f32>,
    pub std1: Array1<f32>,
    pub std2: Array1<f32>,
    pub rho: Array1<f32>,
}

impl MixtureParameters {
    pub fn num_mixtures(&self) -> usize {
        self.pi.len()
    }

    /// Fails on any non-finite value or a violated range.
    pub fn validate(&self) -> Result<()> {
        if !self.e.is_finite() {
            bail!("non-finite pen-lift probability {}", self.e);
        }
        let vectors = [
            ("pi", &self.pi),
            ("mu1", &self.mu1),
            ("mu2", &self.mu2),
            ("std1", &self.std1),
            ("std2", &self.std2),
            ("rho", &self.rho),
        ];
        for (name, v) in vectors {
            if v.len() != self.pi.len() {
                bail!("{} has {} components, pi has {}", name, v.len(), self.pi.len());
            }
            if let Some(bad) = v.iter().find(|x| !x.is_finite()) {
                bail!("non-finite {} value {}", name, bad);
            }
        }
        if self.std1.iter().chain(self.std2.iter()).any(|&s| s <= 0.0) {
            bail!("mixture standard deviation is not positive");
        }
        if self.rho.iter().any(|r| r.abs() >= 1.0) {
            bail!("mixture correlation outside (-1, 1)");
        }
        Ok(())
    }

    /// Shannon entropy of the component weights, in nats.
    pub fn entropy(&self) -> f32 {
        -self
            .pi
            .iter()
            .filter(|&&p| p > 0.0)
            .map(|&p| p * p.ln())
            .sum::<f32>()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MixtureDensityHead {
    pub e: Linear,
    pub pi: Linear,
    pub mu1: Linear,
    pub mu2: Linear,
    pub std1: Linear,
    pub std2: Linear,
    pub rho: Linear,
}

impl MixtureDensityHead {
    pub fn new<R: Rng>(hidden_size: usize, num_mixtures: usize, rng: &mut R) -> Self {
        let mut proj = |out| Linear::truncated_normal(hidden_size, out, INIT_STD, rng);
        Self {
            e: proj(1),
            pi: proj(num_mixtures),
            mu1: proj(num_mixtures),
            mu2: proj(num_mixtures),
            std1: proj(num_mixtures),
            std2: proj(num_mixtures),
            rho: proj(num_mixtures),
        }
    }

    pub fn zeros(hidden_size: usize, num_mixtures: usize) -> Self {
        Self {
            e: Linear::zeros(hidden_size, 1),
            pi: Linear::zeros(hidden_size, num_mixtures),
            mu1: Linear::zeros(hidden_size, num_mixtures),
            mu2: Linear::zeros(hidden_size, num_mixtures),
            std1: Linear::zeros(hidden_size, num_mixtures),
            std2: Linear::zeros(hidden_size, num_mixtures),
            rho: Linear::zeros(hidden_size, num_mixtures),
        }
    }

    pub fn num_mixtures(&self) -> usize {
        self.pi.output_size()
    }

    pub fn forward(&self, h: &Array1<f32>, bias: f32) -> MixtureParameters {
        let e = sigmoid(self.e.forward(h)[0]);
        let pi = softmax(&(self.pi.forward(h) * (1.0 + bias)));
        let std1 = self.std1.forward(h).mapv(|v| (v - bias).exp().max(STD_FLOOR));
        let std2 = self.std2.forward(h).mapv(|v| (v - bias).exp().max(STD_FLOOR));
        let rho = self
            .rho
            .forward(h)
            .mapv(|v| v.tanh().clamp(-RHO_LIMIT, RHO_LIMIT));

        MixtureParameters {
            e,
            pi,
            mu1: self.mu1.forward(h),
            mu2: self.mu2.forward(h),
            std1,
            std2,
            rho,
        }
    }

    pub fn check_shape(&self, hidden_size: usize, num_mixtures: usize) -> Result<()> {
        self.e.check_shape("head.e", hidden_size, 1)?;
        self.pi.check_shape("head.pi", hidden_size, num_mixtures)?;
        self.mu1.check_shape("head.mu1", hidden_size, num_mixtures)?;
        self.mu2.check_shape("head.mu2", hidden_size, num_mixtures)?;
        self.std1.check_shape("head.std1", hidden_size, num_mixtures)?;
        self.std2.check_shape("head.std2", hidden_size, num_mixtures)?;
        self.rho.check_shape("head.rho", hidden_size, num_mixtures)?;
        Ok(())
    }
}

/// Numerically stable softmax.
pub fn softmax(x: &Array1<f32>) -> Array1<f32> {
    let max = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp = x.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum
}

impl ParamGroup for MixtureDensityHead {
    fn param_count(&self) -> usize {
        [&self.e, &self.pi, &self.mu1, &self.mu2, &self.std1, &self.std2, &self.rho]
            .iter()
            .map(|l| l.param_count())
            .sum()
    }

    fn flatten(&self) -> Array1<f32> {
        flatten_all(&[
            &self.e, &self.pi, &self.mu1, &self.mu2, &self.std1, &self.std2, &self.rho,
        ])
    }

    fn assign(&mut self, flat: ArrayView1<f32>) -> Result<()> {
        assign_all(
            &mut [
                &mut self.e,
                &mut self.pi,
                &mut self.mu1,
                &mut self.mu2,
                &mut self.std1,
                &mut self.std2,
                &mut self.rho,
            ],
            flat,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn head() -> MixtureDensityHead {
        let mut rng = StdRng::seed_from_u64(21);
        MixtureDensityHead::new(8, 5, &mut rng)
    }

    fn hidden(scale: f32) -> Array1<f32> {
        Array1::from_shape_fn(8, |i| scale * ((i as f32) - 3.5))
    }

    #[test]
    fn test_parameter_ranges() {
        let head = head();
        for scale in [0.0, 0.5, 5.0] {
            for bias in [0.0, 1.0, 10.0] {
                let p = head.forward(&hidden(scale), bias);
                assert!((p.pi.sum() - 1.0).abs() < 1e-5);
                assert!(p.std1.iter().chain(p.std2.iter()).all(|&s| s > 0.0));
                assert!(p.rho.iter().all(|r| r.abs() < 1.0));
                assert!((0.0..=1.0).contains(&p.e));
                assert!(p.validate().is_ok());
            }
        }
    }

    #[test]
    fn test_std_floor_at_large_bias() {
        let head = MixtureDensityHead::zeros(8, 3);
        let h = hidden(1.0);
        let p = head.forward(&h, 10.0);
        assert!((p.std1[0] - (-10.0f32).exp()).abs() < 1e-9);
        for bias in [14.0, 20.0, 50.0] {
            let p = head.forward(&h, bias);
            assert!(p.std1.iter().chain(p.std2.iter()).all(|&s| s == STD_FLOOR));
            assert!(p.validate().is_ok());
        }
    }

    #[test]
    fn test_bias_lowers_entropy() {
        let head = head();
        let h = hidden(2.0);
        let mut last = f32::INFINITY;
        for bias in [0.0, 0.5, 1.0, 2.0, 5.0] {
            let entropy = head.forward(&h, bias).entropy();
            assert!(entropy <= last + 1e-6);
            last = entropy;
        }
    }

    #[test]
    fn test_bias_shrinks_std() {
        let head = head();
        let h = hidden(1.0);
        let plain = head.forward(&h, 0.0);
        let sharp = head.forward(&h, 2.0);
        for (a, b) in plain.std1.iter().zip(sharp.std1.iter()) {
            assert!(b < a);
        }
        assert_eq!(plain.mu1, sharp.mu1);
    }

    #[test]
    fn test_zero_head_is_uniform() {
        let head = MixtureDensityHead::zeros(4, 4);
        let p = head.forward(&Array1::ones(4), 0.0);
        assert!(p.pi.iter().all(|&v| (v - 0.25).abs() < 1e-6));
        assert!((p.e - 0.5).abs() < 1e-6);
        assert!(p.std1.iter().all(|&s| (s - 1.0).abs() < 1e-6));
        assert!((p.entropy() - 4.0f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_validate_rejects_nan() {
        let head = MixtureDensityHead::zeros(4, 2);
        let mut p = head.forward(&Array1::ones(4), 0.0);
        p.mu2[1] = f32::NAN;
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("mu2"));
    }

    #[test]
    fn test_softmax_stable() {
        let s = softmax(&Array1::from_vec(vec![1000.0, 1000.0]));
        assert!((s[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_param_count_and_shape() {
        let head = head();
        assert_eq!(head.param_count(), 9 + 6 * (8 * 5 + 5));
        assert_eq!(head.flatten().len(), head.param_count());
        assert!(head.check_shape(8, 5).is_ok());
        assert!(head.check_shape(8, 6).is_err());
    }
}
