//! Reference handwriting used to prime generation.

use std::path::Path;

use anyhow::{bail, Result};

use crate::data::{read_samples, write_samples, TranscribedSample};

/// An indexed set of transcribed reference samples.
#[derive(Clone, Debug, Default)]
pub struct StyleBank {
    samples: Vec<TranscribedSample>,
}

impl StyleBank {
    pub fn new(samples: Vec<TranscribedSample>) -> Self {
        Self { samples }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let samples = read_samples(path)?;
        tracing::info!("Loaded {} style samples from {}", samples.len(), path.display());
        Ok(Self { samples })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_samples(path, &self.samples)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[TranscribedSample] {
        &self.samples
    }

    /// Reference sample `index`, rejecting empty strokes or transcript.
    pub fn get(&self, index: usize) -> Result<&TranscribedSample> {
        let sample = match self.samples.get(index) {
            Some(s) => s,
            None => bail!(
                "style index {} out of range ({} styles)",
                index,
                self.samples.len()
            ),
        };
        if sample.strokes.is_empty() {
            bail!("style {} has no strokes", index);
        }
        if sample.text.is_empty() {
            bail!("style {} has an empty transcript", index);
        }
        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StrokeSequence;

    fn bank() -> StyleBank {
        StyleBank::new(vec![
            TranscribedSample::new("ok", StrokeSequence::from_triples(&[[0.0, 1.0, 1.0]])),
            TranscribedSample::new("empty", StrokeSequence::default()),
        ])
    }

    #[test]
    fn test_get_checks_range() {
        let b = bank();
        assert_eq!(b.get(0).unwrap().text, "ok");
        let err = b.get(7).unwrap_err();
        assert_eq!(err.to_string(), "style index 7 out of range (2 styles)");
    }

    #[test]
    fn test_empty_strokes_rejected() {
        assert!(bank().get(1).is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("styles.json");
        bank().save(&path).unwrap();
        let back = StyleBank::load(&path).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.samples()[0], bank().samples()[0]);
    }
}
