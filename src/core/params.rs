//! Trainable parameter groups.
//!
//! Every component exposes its weights as one flat vector so a training
//! driver can perturb, clip and update each group independently.

use anyhow::{bail, Result};
use ndarray::{Array1, ArrayView1};

/// Which part of a model a parameter group belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GroupKind {
    /// One LSTM layer.
    Recurrent(usize),
    /// The attention window projections.
    Window,
    /// The mixture-density head.
    Output,
}

impl GroupKind {
    pub fn label(&self) -> String {
        match self {
            GroupKind::Recurrent(l) => format!("lstm_{}", l),
            GroupKind::Window => "window".to_string(),
            GroupKind::Output => "output".to_string(),
        }
    }
}

/// Gradient clipping applied to one parameter group.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClipPolicy {
    None,
    /// Clamp every component to `[-c, c]`.
    Value(f32),
}

impl ClipPolicy {
    pub fn apply(&self, grad: &mut Array1<f32>) {
        if let ClipPolicy::Value(c) = *self {
            let c = c.abs();
            grad.mapv_inplace(|g| g.clamp(-c, c));
        }
    }
}

/// A component with a flat view of its parameters.
pub trait ParamGroup {
    fn param_count(&self) -> usize;

    /// All parameters in a fixed order.
    fn flatten(&self) -> Array1<f32>;

    /// Overwrite all parameters from a vector in [`flatten`](Self::flatten) order.
    fn assign(&mut self, flat: ArrayView1<f32>) -> Result<()>;
}

/// Flatten several groups back to back.
pub fn flatten_all(groups: &[&dyn ParamGroup]) -> Array1<f32> {
    let mut out = Vec::with_capacity(groups.iter().map(|g| g.param_count()).sum());
    for g in groups {
        out.extend(g.flatten().iter().copied());
    }
    Array1::from_vec(out)
}

/// Inverse of [`flatten_all`].
pub fn assign_all(groups: &mut [&mut dyn ParamGroup], flat: ArrayView1<f32>) -> Result<()> {
    let expected: usize = groups.iter().map(|g| g.param_count()).sum();
    if flat.len() != expected {
        bail!(
            "parameter vector has {} values, expected {}",
            flat.len(),
            expected
        );
    }
    let mut offset = 0;
    for g in groups.iter_mut() {
        let n = g.param_count();
        g.assign(flat.slice(ndarray::s![offset..offset + n]))?;
        offset += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::linear::Linear;

    #[test]
    fn test_labels() {
        assert_eq!(GroupKind::Recurrent(2).label(), "lstm_2");
        assert_eq!(GroupKind::Window.label(), "window");
        assert_eq!(GroupKind::Output.label(), "output");
    }

    #[test]
    fn test_clip_value() {
        let mut g = Array1::from_vec(vec![-150.0, 3.0, 40.0]);
        ClipPolicy::Value(10.0).apply(&mut g);
        assert_eq!(g.to_vec(), vec![-10.0, 3.0, 10.0]);
        let mut g = Array1::from_vec(vec![-150.0]);
        ClipPolicy::None.apply(&mut g);
        assert_eq!(g[0], -150.0);
    }

    #[test]
    fn test_flatten_assign_all() {
        let mut a = Linear::zeros(2, 1);
        let mut b = Linear::zeros(1, 2);
        a.bias[0] = 1.0;
        b.weight[[1, 0]] = 2.0;
        let flat = flatten_all(&[&a, &b]);
        assert_eq!(flat.to_vec(), vec![0.0, 0.0, 1.0, 0.0, 2.0, 0.0, 0.0]);

        let doubled = flat.mapv(|v| v * 2.0);
        assign_all(&mut [&mut a, &mut b], doubled.view()).unwrap();
        assert_eq!(a.bias[0], 2.0);
        assert_eq!(b.weight[[1, 0]], 4.0);
        assert!(assign_all(&mut [&mut a, &mut b], flat.slice(ndarray::s![..3])).is_err());
    }
}
