//! Trained-model persistence.
//!
//! A checkpoint bundles everything generation needs: the model weights, the
//! offset statistics used to normalise the training data and the character
//! vocabulary.  It is written with bincode and validated on load against
//! the stored (or an expected) model configuration.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::CHECKPOINT_VERSION;
use crate::core::{ModelConfig, ModelKind, ModelWeights};
use crate::data::{Normalizer, Vocabulary};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub model: ModelWeights,
    pub normalizer: Normalizer,
    pub vocabulary: Vocabulary,
}

impl Checkpoint {
    pub fn new(model: ModelWeights, normalizer: Normalizer, vocabulary: Vocabulary) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            model,
            normalizer,
            vocabulary,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != CHECKPOINT_VERSION {
            bail!(
                "unsupported checkpoint version {} (expected {})",
                self.version,
                CHECKPOINT_VERSION
            );
        }
        self.model.check_shapes()?;
        let config = self.model.config();
        if config.kind == ModelKind::Synthesis && self.vocabulary.len() != config.vocab_size {
            bail!(
                "checkpoint vocabulary has {} symbols, model expects {}",
                self.vocabulary.len(),
                config.vocab_size
            );
        }
        let n = &self.normalizer;
        if n.std.iter().any(|&s| !(s > 0.0) || !s.is_finite()) || n.mean.iter().any(|m| !m.is_finite()) {
            bail!("invalid normalizer {:?}", n);
        }
        Ok(())
    }

    /// Fail unless the stored model matches `expected`.
    pub fn expect_config(&self, expected: &ModelConfig) -> Result<()> {
        let stored = self.model.config();
        if stored != expected {
            bail!(
                "checkpoint config {:?} does not match expected {:?}",
                stored,
                expected
            );
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("Checkpoint serialisation should not fail")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut ckpt: Self = bincode::deserialize(bytes).context("malformed checkpoint")?;
        ckpt.vocabulary.reindex();
        ckpt.validate()?;
        Ok(ckpt)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        bincode::serialize_into(BufWriter::new(file), self)
            .with_context(|| format!("failed to write checkpoint {}", path.display()))?;
        tracing::info!(
            "Saved {:?} checkpoint to {}",
            self.model.kind(),
            path.display()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut ckpt: Self = bincode::deserialize_from(BufReader::new(file))
            .with_context(|| format!("malformed checkpoint {}", path.display()))?;
        ckpt.vocabulary.reindex();
        ckpt.validate()
            .with_context(|| format!("invalid checkpoint {}", path.display()))?;
        tracing::info!(
            "Loaded {:?} checkpoint from {} ({} parameters)",
            ckpt.model.kind(),
            path.display(),
            ckpt.model.as_model().param_count()
        );
        Ok(ckpt)
    }

    /// Load and require a specific architecture.
    pub fn load_expecting(path: &Path, expected: &ModelConfig) -> Result<Self> {
        let ckpt = Self::load(path)?;
        ckpt.expect_config(expected)?;
        Ok(ckpt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vocabulary {
        Vocabulary::from_transcripts(&["hello world"])
    }

    fn config() -> ModelConfig {
        ModelConfig {
            kind: ModelKind::Synthesis,
            input_size: 3,
            hidden_size: 8,
            n_layers: 2,
            num_mixtures: 3,
            window_mixtures: 2,
            vocab_size: vocab().len(),
        }
    }

    fn checkpoint() -> Checkpoint {
        Checkpoint::new(
            ModelWeights::from_config(config(), 5).unwrap(),
            Normalizer {
                mean: [0.5, -0.2],
                std: [2.0, 1.5],
            },
            vocab(),
        )
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        let ckpt = checkpoint();
        ckpt.save(&path).unwrap();
        let back = Checkpoint::load(&path).unwrap();
        assert_eq!(back.normalizer, ckpt.normalizer);
        assert_eq!(back.vocabulary.id('w'), ckpt.vocabulary.id('w'));
        match (&back.model, &ckpt.model) {
            (ModelWeights::Synthesis(a), ModelWeights::Synthesis(b)) => {
                assert_eq!(a.head.pi.weight, b.head.pi.weight);
                assert_eq!(a.window.kappa.bias, b.window.kappa.bias);
            }
            _ => panic!("model kind changed"),
        }
    }

    #[test]
    fn test_load_expecting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        checkpoint().save(&path).unwrap();
        assert!(Checkpoint::load_expecting(&path, &config()).is_ok());
        let mut other = config();
        other.num_mixtures = 20;
        assert!(Checkpoint::load_expecting(&path, &other).is_err());
    }

    #[test]
    fn test_version_rejected() {
        let mut ckpt = checkpoint();
        ckpt.version = 99;
        let err = Checkpoint::from_bytes(&ckpt.to_bytes()).unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_vocabulary_mismatch_rejected() {
        let mut ckpt = checkpoint();
        ckpt.vocabulary = Vocabulary::from_transcripts(&["abc"]);
        assert!(ckpt.validate().is_err());
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut ckpt = checkpoint();
        if let ModelWeights::Synthesis(net) = &mut ckpt.model {
            net.config.hidden_size = 9;
        }
        let err = Checkpoint::from_bytes(&ckpt.to_bytes()).unwrap_err();
        assert!(format!("{:#}", err).contains("shape mismatch"));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(Checkpoint::from_bytes(&[1, 2, 3]).is_err());
        let dir = tempfile::tempdir().unwrap();
        assert!(Checkpoint::load(&dir.path().join("missing.bin")).is_err());
    }
}
