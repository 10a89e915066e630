//! Runtime module: checkpoint persistence shared by the CLI, the trainer and
//! generation.

pub mod checkpoint;

pub use checkpoint::Checkpoint;
