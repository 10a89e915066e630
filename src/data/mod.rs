//! Data model shared by the model, the generator and the training driver.

pub mod sample;
pub mod stroke;
pub mod text;
pub mod vocab;

pub use sample::{read_samples, write_samples, TrainingSample, TranscribedSample};
pub use stroke::{Normalizer, StrokePoint, StrokeSequence};
pub use text::CharacterSequence;
pub use vocab::Vocabulary;
