//! Multi-layer recurrent core with skip connections.
//!
//! ```text
//! layer 0:  x_0 = [input, context]
//! hook:     context = attend(h_0)          (once per step)
//! layer l:  x_l = [input, context, h_{l-1}]
//! output:   h_{L-1}
//! ```
//!
//! `context` is the attention window for the synthesis model and empty for
//! the prediction model.

use anyhow::{bail, Result};
use ndarray::{concatenate, Array1, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::lstm::LstmCell;
use super::state::RecurrentState;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecurrentStack {
    pub cells: Vec<LstmCell>,
    pub input_size: usize,
    pub context_size: usize,
    pub hidden_size: usize,
}

impl RecurrentStack {
    pub fn new<R: Rng>(
        input_size: usize,
        context_size: usize,
        hidden_size: usize,
        n_layers: usize,
        rng: &mut R,
    ) -> Self {
        let cells = (0..n_layers)
            .map(|l| LstmCell::new(layer_input_size(l, input_size, context_size, hidden_size), hidden_size, rng))
            .collect();
        Self {
            cells,
            input_size,
            context_size,
            hidden_size,
        }
    }

    pub fn n_layers(&self) -> usize {
        self.cells.len()
    }

    pub fn initial_state(&self) -> RecurrentState {
        RecurrentState::new(self.cells.len(), self.hidden_size)
    }

    /// Advance every layer by one step.
    ///
    /// `context` is the window from the previous step; `attend` maps the
    /// first layer's output to the refreshed window used by deeper layers.
    /// The refreshed window is returned alongside the final hidden output.
    pub fn step<F>(
        &self,
        input: &Array1<f32>,
        context: &Array1<f32>,
        state: &mut RecurrentState,
        mut attend: F,
    ) -> Result<(Array1<f32>, Array1<f32>)>
    where
        F: FnMut(&Array1<f32>) -> Result<Array1<f32>>,
    {
        if input.len() != self.input_size {
            bail!("step input has width {}, expected {}", input.len(), self.input_size);
        }
        if context.len() != self.context_size {
            bail!("context has width {}, expected {}", context.len(), self.context_size);
        }
        if state.layers.len() != self.cells.len() {
            bail!(
                "recurrent state has {} layers, stack has {}",
                state.layers.len(),
                self.cells.len()
            );
        }

        let mut context = context.clone();
        let mut output: Array1<f32> = Array1::zeros(self.hidden_size);

        for (l, (cell, layer_state)) in self.cells.iter().zip(state.layers.iter_mut()).enumerate() {
            let x = if l == 0 {
                concatenate(Axis(0), &[input.view(), context.view()])?
            } else {
                concatenate(Axis(0), &[input.view(), context.view(), output.view()])?
            };
            output = cell.forward_step(&x, layer_state);

            if l == 0 {
                context = attend(&output)?;
                if context.len() != self.context_size {
                    bail!(
                        "attention produced width {}, expected {}",
                        context.len(),
                        self.context_size
                    );
                }
            }
        }

        state.steps += 1;
        Ok((output, context))
    }

    pub fn check_shape(&self, input_size: usize, context_size: usize, hidden_size: usize, n_layers: usize) -> Result<()> {
        if self.cells.len() != n_layers {
            bail!("shape mismatch: expected {} lstm layers, found {}", n_layers, self.cells.len());
        }
        if self.input_size != input_size || self.context_size != context_size || self.hidden_size != hidden_size {
            bail!(
                "shape mismatch for recurrent stack: expected input {} context {} hidden {}, found {} {} {}",
                input_size,
                context_size,
                hidden_size,
                self.input_size,
                self.context_size,
                self.hidden_size
            );
        }
        for (l, cell) in self.cells.iter().enumerate() {
            cell.check_shape(
                &format!("lstm_{}", l),
                layer_input_size(l, input_size, context_size, hidden_size),
                hidden_size,
            )?;
        }
        Ok(())
    }
}

fn layer_input_size(layer: usize, input_size: usize, context_size: usize, hidden_size: usize) -> usize {
    if layer == 0 {
        input_size + context_size
    } else {
        input_size + context_size + hidden_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn stack(context: usize) -> RecurrentStack {
        let mut rng = StdRng::seed_from_u64(11);
        RecurrentStack::new(3, context, 6, 3, &mut rng)
    }

    #[test]
    fn test_layer_widths() {
        let s = stack(4);
        assert_eq!(s.cells[0].input_size(), 7);
        assert_eq!(s.cells[1].input_size(), 13);
        assert_eq!(s.cells[2].input_size(), 13);
        assert!(s.check_shape(3, 4, 6, 3).is_ok());
        assert!(s.check_shape(3, 5, 6, 3).is_err());
    }

    #[test]
    fn test_attend_called_once_per_step() {
        let s = stack(4);
        let mut state = s.initial_state();
        let mut calls = 0;
        let (out, ctx) = s
            .step(&Array1::ones(3), &Array1::zeros(4), &mut state, |h| {
                calls += 1;
                assert_eq!(h.len(), 6);
                Ok(Array1::from_elem(4, 0.5))
            })
            .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(out.len(), 6);
        assert_eq!(ctx, Array1::from_elem(4, 0.5));
        assert_eq!(state.steps, 1);
    }

    #[test]
    fn test_empty_context() {
        let s = stack(0);
        let mut state = s.initial_state();
        let empty = Array1::zeros(0);
        let (out, _) = s
            .step(&Array1::ones(3), &empty, &mut state, |_| Ok(Array1::zeros(0)))
            .unwrap();
        assert_eq!(out.len(), 6);
        assert!(state.all_healthy());
    }

    #[test]
    fn test_rejects_bad_widths() {
        let s = stack(4);
        let mut state = s.initial_state();
        assert!(s
            .step(&Array1::ones(2), &Array1::zeros(4), &mut state, |_| Ok(Array1::zeros(4)))
            .is_err());
        let err = s
            .step(&Array1::ones(3), &Array1::zeros(4), &mut state, |_| Ok(Array1::zeros(2)))
            .unwrap_err();
        assert!(err.to_string().contains("attention produced"));
    }

    #[test]
    fn test_state_carries_between_steps() {
        let s = stack(0);
        let mut state = s.initial_state();
        let empty = Array1::zeros(0);
        let (a, _) = s.step(&Array1::ones(3), &empty, &mut state, |_| Ok(Array1::zeros(0))).unwrap();
        let (b, _) = s.step(&Array1::ones(3), &empty, &mut state, |_| Ok(Array1::zeros(0))).unwrap();
        assert!(a.iter().zip(b.iter()).any(|(x, y)| (x - y).abs() > 1e-7));
    }
}
