//! Masked negative log-likelihood of a stroke sequence.
//!
//! ```text
//! Z  = ((dx−μ1)/σ1)² + ((dy−μ2)/σ2)² − 2ρ(dx−μ1)(dy−μ2)/(σ1σ2)
//! N  = exp(−Z / 2(1−ρ²)) / (2π σ1 σ2 √(1−ρ²))
//! ℓt = −ln max(Σ π·N, ε) − [p ln e + (1−p) ln(1−e)]
//! ```
//!
//! A sequence loss sums ℓt over unmasked steps.  A batch loss is the mean of
//! the sequence losses.

use std::f32::consts::PI;

use anyhow::{bail, Context, Result};
use rayon::prelude::*;

use crate::config::DENSITY_EPS;
use crate::core::{MixtureParameters, StrokeModel};
use crate::data::{StrokePoint, TrainingSample};

/// Mixture density of the offset `(dx, dy)`, before flooring.
pub fn mixture_density(p: &MixtureParameters, dx: f32, dy: f32) -> f32 {
    let mut density = 0.0f32;
    for m in 0..p.num_mixtures() {
        let (s1, s2, rho) = (p.std1[m], p.std2[m], p.rho[m]);
        let n1 = (dx - p.mu1[m]) / s1;
        let n2 = (dy - p.mu2[m]) / s2;
        let z = n1 * n1 + n2 * n2 - 2.0 * rho * n1 * n2;
        let one_minus = 1.0 - rho * rho;
        let norm = 2.0 * PI * s1 * s2 * one_minus.sqrt();
        density += p.pi[m] * (-z / (2.0 * one_minus)).exp() / norm;
    }
    density
}

/// Loss of a single target point.
pub fn step_loss(p: &MixtureParameters, target: &StrokePoint) -> f32 {
    let density = mixture_density(p, target.dx, target.dy);
    let bce = if target.pen_lift {
        p.e.max(DENSITY_EPS).ln()
    } else {
        (1.0 - p.e).max(DENSITY_EPS).ln()
    };
    -density.max(DENSITY_EPS).ln() - bce
}

/// Loss of one sample, summed over unmasked steps.
pub fn sequence_loss<M: StrokeModel + ?Sized>(model: &M, sample: &TrainingSample) -> Result<f32> {
    let (inputs, targets) = match sample.strokes.shifted_pairs() {
        Some(pair) => pair,
        None => bail!("sequence needs at least 2 points, got {}", sample.strokes.len()),
    };
    let params = model.unroll(&inputs, sample.text.as_ref())?;

    let mut total = 0.0f32;
    for (t, (p, target)) in params.iter().zip(&targets.points).enumerate() {
        if sample.mask.get(t + 1).copied().unwrap_or(0.0) <= 0.5 {
            continue;
        }
        total += step_loss(p, target);
    }
    if !total.is_finite() {
        bail!("non-finite sequence loss {}", total);
    }
    Ok(total)
}

/// Mean sequence loss over a batch, evaluated in parallel.
pub fn batch_loss<M: StrokeModel + ?Sized>(model: &M, batch: &[TrainingSample]) -> Result<f32> {
    if batch.is_empty() {
        bail!("empty batch");
    }
    let losses = batch
        .par_iter()
        .enumerate()
        .map(|(i, s)| sequence_loss(model, s).with_context(|| format!("batch sample {}", i)))
        .collect::<Result<Vec<f32>>>()?;
    Ok(losses.iter().sum::<f32>() / losses.len() as f32)
}
