//! Forward-gradient estimation from random tangent directions.
//!
//! Instead of backpropagating through the recurrence, the driver measures
//! how the batch loss changes along a few random unit directions in a
//! parameter group and projects those slopes back onto the directions:
//!
//! ```text
//! jvp_k  ≈ (L(θ + ε·v_k) − L(θ)) / ε
//! ĝ      = (1/K) Σ_k jvp_k · v_k
//! ```
//!
//! Each direction costs one extra loss evaluation and no activation storage.

use anyhow::{bail, Result};
use ndarray::Array1;
use rand::Rng;
use rand_distr::StandardNormal;

/// A perturbation direction in the parameter space of one group.
#[derive(Clone, Debug)]
pub struct TangentVector {
    /// Unit-norm direction.
    pub values: Array1<f32>,

    /// Finite-difference step along `values`.
    pub epsilon: f32,
}

impl TangentVector {
    /// Isotropic random unit direction.
    pub fn random_unit<R: Rng>(dim: usize, epsilon: f32, rng: &mut R) -> Self {
        let raw: Array1<f32> = Array1::from_shape_fn(dim, |_| rng.sample::<f32, _>(StandardNormal));
        let norm = raw.dot(&raw).sqrt();
        Self {
            values: raw / (norm + 1e-8),
            epsilon,
        }
    }

    /// One-hot direction.
    pub fn basis(dim: usize, index: usize, epsilon: f32) -> Self {
        let mut values = Array1::zeros(dim);
        values[index] = 1.0;
        Self { values, epsilon }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// `θ + ε·v`.
    pub fn perturb(&self, theta: &Array1<f32>) -> Array1<f32> {
        theta + &(&self.values * self.epsilon)
    }

    /// Directional derivative from a base and a perturbed loss.
    pub fn slope(&self, base_loss: f32, perturbed_loss: f32) -> f32 {
        (perturbed_loss - base_loss) / self.epsilon
    }
}

/// Average of the directional estimates `jvp_k · v_k`.
pub fn multi_sample_gradient(slopes: &[f32], tangents: &[TangentVector]) -> Result<Array1<f32>> {
    if slopes.len() != tangents.len() || tangents.is_empty() {
        bail!(
            "need one slope per tangent (got {} slopes, {} tangents)",
            slopes.len(),
            tangents.len()
        );
    }
    let mut grad = Array1::zeros(tangents[0].dim());
    for (&s, t) in slopes.iter().zip(tangents) {
        if t.dim() != grad.len() {
            bail!("tangent of width {} in a group of width {}", t.dim(), grad.len());
        }
        grad.scaled_add(s, &t.values);
    }
    Ok(grad / slopes.len() as f32)
}
