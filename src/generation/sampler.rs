//! Drawing one pen movement from a set of mixture parameters.
//!
//! ```text
//! pen_lift ~ Bernoulli(e)
//! m        ~ Categorical(pi)
//! dx = μ1 + σ1·z1
//! dy = μ2 + σ2·(ρ·z1 + √(1−ρ²)·z2)       z1, z2 ~ N(0, 1)
//! ```

use anyhow::{Context, Result};
use rand::distributions::{Bernoulli, Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::core::MixtureParameters;
use crate::data::StrokePoint;

/// Seeded sampler owned by one generation call.
pub struct PenSampler {
    rng: StdRng,
}

impl PenSampler {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Sample the next point.  Fails on parameters that are not a valid
    /// distribution.
    pub fn sample(&mut self, params: &MixtureParameters) -> Result<StrokePoint> {
        params.validate().context("cannot sample from mixture")?;

        let pen = Bernoulli::new(params.e.clamp(0.0, 1.0) as f64)
            .context("invalid pen-lift probability")?;
        let pen_lift = pen.sample(&mut self.rng);

        let component = WeightedIndex::new(params.pi.iter().copied())
            .context("invalid mixture weights")?;
        let m = component.sample(&mut self.rng);

        let z1: f32 = self.rng.sample(StandardNormal);
        let z2: f32 = self.rng.sample(StandardNormal);
        let rho = params.rho[m];
        let dx = params.mu1[m] + params.std1[m] * z1;
        let dy = params.mu2[m] + params.std2[m] * (rho * z1 + (1.0 - rho * rho).sqrt() * z2);

        Ok(StrokePoint::new(pen_lift, dx, dy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    fn params(e: f32, pi: Vec<f32>, mu: Vec<(f32, f32)>, std: f32, rho: f32) -> MixtureParameters {
        let k = pi.len();
        MixtureParameters {
            e,
            pi: Array1::from_vec(pi),
            mu1: mu.iter().map(|m| m.0).collect(),
            mu2: mu.iter().map(|m| m.1).collect(),
            std1: Array1::from_elem(k, std),
            std2: Array1::from_elem(k, std),
            rho: Array1::from_elem(k, rho),
        }
    }

    #[test]
    fn test_seeded_sampling_repeats() {
        let p = params(0.3, vec![0.5, 0.5], vec![(0.0, 0.0), (5.0, 5.0)], 1.0, 0.2);
        let mut a = PenSampler::new(Some(11));
        let mut b = PenSampler::new(Some(11));
        for _ in 0..20 {
            assert_eq!(a.sample(&p).unwrap(), b.sample(&p).unwrap());
        }
    }

    #[test]
    fn test_tiny_std_hits_chosen_mean() {
        let p = params(0.0, vec![0.0, 1.0], vec![(-3.0, 9.0), (2.0, -1.0)], 1e-6, 0.0);
        let mut s = PenSampler::new(Some(1));
        for _ in 0..10 {
            let pt = s.sample(&p).unwrap();
            assert!(!pt.pen_lift);
            assert!((pt.dx - 2.0).abs() < 1e-3);
            assert!((pt.dy + 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_certain_pen_lift() {
        let p = params(1.0, vec![1.0], vec![(0.0, 0.0)], 1.0, 0.0);
        let mut s = PenSampler::new(Some(2));
        assert!((0..10).all(|_| s.sample(&p).unwrap().pen_lift));
    }

    #[test]
    fn test_correlation_sign() {
        let p = params(0.0, vec![1.0], vec![(0.0, 0.0)], 1.0, 0.95);
        let mut s = PenSampler::new(Some(3));
        let cov: f32 = (0..2000)
            .map(|_| {
                let pt = s.sample(&p).unwrap();
                pt.dx * pt.dy
            })
            .sum::<f32>()
            / 2000.0;
        assert!(cov > 0.7);
    }

    #[test]
    fn test_rejects_non_finite() {
        let mut p = params(0.5, vec![1.0], vec![(0.0, 0.0)], 1.0, 0.0);
        p.std1[0] = f32::NAN;
        assert!(PenSampler::new(Some(0)).sample(&p).is_err());
    }
}
