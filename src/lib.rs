//! # scrivener
//!
//! Handwriting synthesis with a recurrent pen model.
//!
//! ## Components
//!
//! 1. **MixtureDensityHead**: hidden state to a bivariate-Gaussian mixture
//!    over the next pen offset plus a Bernoulli pen-lift probability
//! 2. **AttentionWindow**: monotonic, location-based soft alignment of the
//!    writer onto the target characters
//! 3. **RecurrentStack**: multi-layer LSTM with skip connections and the
//!    window injected after the first layer
//! 4. **LikelihoodLoss**: masked negative log-likelihood for training
//! 5. **Generator**: autoregressive sampling with bias sharpening, style
//!    priming and end-of-text detection
//!
//! ## Model variants
//!
//! - [`core::model::PredictionNet`]: unconditional scribbling
//! - [`core::model::SynthesisNet`]: text-conditioned handwriting

pub mod core;
pub mod data;
pub mod generation;
pub mod runtime;
pub mod training;

/// Crate-wide defaults.
pub mod config {
    /// LSTM hidden width.
    pub const HIDDEN_SIZE: usize = 400;

    /// Number of stacked LSTM layers.
    pub const N_LAYERS: usize = 3;

    /// Gaussian components in the output mixture.
    pub const NUM_MIXTURES: usize = 20;

    /// Gaussian components in the attention window.
    pub const WINDOW_MIXTURES: usize = 10;

    /// Width of a step input: (pen_lift, dx, dy).
    pub const INPUT_SIZE: usize = 3;

    /// Standard deviation of the truncated-normal projection initialiser.
    pub const INIT_STD: f32 = 0.075;

    /// Floor applied to densities and probabilities before taking logs.
    pub const DENSITY_EPS: f32 = 1e-8;

    /// Lower bound on mixture standard deviations.
    pub const STD_FLOOR: f32 = 1e-6;

    /// |rho| is clamped strictly below this value.
    pub const RHO_LIMIT: f32 = 1.0 - 1e-5;

    /// End-of-text sentinel appended to every conditioning text.
    pub const TEXT_SENTINEL: &str = "  ";

    /// Number of characters in [`TEXT_SENTINEL`].
    pub const SENTINEL_LEN: usize = 2;

    /// Default maximum number of generated points.
    pub const DEFAULT_SEQ_LEN: usize = 400;

    /// Default sampling bias.
    pub const DEFAULT_BIAS: f32 = 10.0;

    /// Text written by synthesis models after an improved training epoch.
    pub const PREVIEW_TEXT: &str = "Hello world!";

    /// Points drawn by prediction models after an improved training epoch.
    pub const PREVIEW_LEN: usize = 700;

    /// Gradient clip value for recurrent and window parameters.
    pub const RECURRENT_CLIP: f32 = 10.0;

    /// Gradient clip value for the output head.
    pub const OUTPUT_CLIP: f32 = 100.0;

    /// Checkpoint format version.
    pub const CHECKPOINT_VERSION: u32 = 1;

    /// Symbol stored at vocabulary index 0.
    pub const NULL_SYMBOL: &str = "<NULL>";
}
