//! Generation: sampling, style priming and the decode loop.

pub mod generator;
pub mod sampler;
pub mod style;

pub use generator::{
    GenerationConfig, GenerationResult, Generator, PrimingMode, StepTrace, Termination,
};
pub use sampler::PenSampler;
pub use style::StyleBank;
