//! Core module: LSTM stack, attention window, mixture head and the two
//! model variants built from them.

pub mod linear;
pub mod lstm;
pub mod mixture;
pub mod model;
pub mod params;
pub mod stack;
pub mod state;
pub mod window;

pub use mixture::{MixtureDensityHead, MixtureParameters};
pub use model::{
    ModelConfig, ModelKind, ModelWeights, PredictionNet, StrokeModel, SynthesisNet,
    SynthesisState, SynthesisStep,
};
pub use params::{ClipPolicy, GroupKind, ParamGroup};
pub use state::{AlignmentState, LstmState, RecurrentState};
