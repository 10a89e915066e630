//! Dense projection `y = W·x + b`.

use anyhow::{bail, Result};
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use super::params::ParamGroup;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Linear {
    /// W ∈ R^{out × in}
    pub weight: Array2<f32>,

    /// b ∈ R^{out}
    pub bias: Array1<f32>,
}

impl Linear {
    pub fn zeros(input: usize, output: usize) -> Self {
        Self {
            weight: Array2::zeros((output, input)),
            bias: Array1::zeros(output),
        }
    }

    /// Truncated-normal weights (resampled beyond 2σ), zero bias.
    pub fn truncated_normal<R: Rng>(input: usize, output: usize, std: f32, rng: &mut R) -> Self {
        let dist = Normal::new(0.0f32, std.max(f32::MIN_POSITIVE)).ok();
        let weight = Array2::from_shape_fn((output, input), |_| match &dist {
            Some(d) => loop {
                let v: f32 = d.sample(rng);
                if v.abs() <= 2.0 * std {
                    break v;
                }
            },
            None => 0.0,
        });
        Self {
            weight,
            bias: Array1::zeros(output),
        }
    }

    pub fn input_size(&self) -> usize {
        self.weight.ncols()
    }

    pub fn output_size(&self) -> usize {
        self.weight.nrows()
    }

    pub fn forward(&self, x: &Array1<f32>) -> Array1<f32> {
        self.weight.dot(x) + &self.bias
    }

    /// Fails unless the layer maps `input` → `output`.
    pub fn check_shape(&self, name: &str, input: usize, output: usize) -> Result<()> {
        if self.weight.dim() != (output, input) || self.bias.len() != output {
            bail!(
                "shape mismatch for {}: expected {}x{}, found {}x{} (bias {})",
                name,
                output,
                input,
                self.weight.nrows(),
                self.weight.ncols(),
                self.bias.len()
            );
        }
        Ok(())
    }
}

impl ParamGroup for Linear {
    fn param_count(&self) -> usize {
        self.weight.len() + self.bias.len()
    }

    fn flatten(&self) -> Array1<f32> {
        self.weight.iter().chain(self.bias.iter()).copied().collect()
    }

    fn assign(&mut self, flat: ArrayView1<f32>) -> Result<()> {
        if flat.len() != self.param_count() {
            bail!(
                "linear layer expects {} parameters, got {}",
                self.param_count(),
                flat.len()
            );
        }
        let mut it = flat.iter();
        for (w, &v) in self.weight.iter_mut().zip(&mut it) {
            *w = v;
        }
        for (b, &v) in self.bias.iter_mut().zip(&mut it) {
            *b = v;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_forward_affine() {
        let mut l = Linear::zeros(2, 1);
        l.weight[[0, 0]] = 2.0;
        l.weight[[0, 1]] = -1.0;
        l.bias[0] = 0.5;
        let y = l.forward(&Array1::from_vec(vec![3.0, 4.0]));
        assert!((y[0] - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_truncated_normal_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let l = Linear::truncated_normal(32, 16, 0.075, &mut rng);
        assert!(l.weight.iter().all(|v| v.abs() <= 0.15));
        assert!(l.bias.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_flatten_assign_roundtrip() {
        let mut rng = StdRng::seed_from_u64(1);
        let l = Linear::truncated_normal(3, 2, 0.1, &mut rng);
        let flat = l.flatten();
        assert_eq!(flat.len(), 8);
        let mut other = Linear::zeros(3, 2);
        other.assign(flat.view()).unwrap();
        assert_eq!(other.weight, l.weight);
        assert!(other.assign(Array1::zeros(3).view()).is_err());
    }

    #[test]
    fn test_check_shape() {
        let l = Linear::zeros(4, 3);
        assert!(l.check_shape("l", 4, 3).is_ok());
        let err = l.check_shape("head.pi", 4, 5).unwrap_err();
        assert!(err.to_string().contains("head.pi"));
    }
}
