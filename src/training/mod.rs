//! Training: likelihood loss and the forward-gradient driver.
//!
//! - **loss**: masked mixture-density negative log-likelihood
//! - **tangent**: random-direction gradient estimation
//! - **trainer**: per-group clipped updates, step decay, early stopping

pub mod loss;
pub mod tangent;
pub mod trainer;

pub use loss::{batch_loss, sequence_loss, step_loss};
pub use trainer::{Trainer, TrainerConfig, TrainingReport};
