//! Transcribed stroke samples as stored on disk and as fed to training.
//!
//! On disk a sample set is a JSON list of
//! `{ "text": "...", "strokes": [[pen_lift, dx, dy], ...] }` records in raw
//! (unnormalised) offsets.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use super::stroke::{Normalizer, StrokeSequence};
use super::text::CharacterSequence;
use super::vocab::Vocabulary;

#[derive(Serialize, Deserialize)]
struct SampleRecord {
    text: String,
    strokes: Vec<[f32; 3]>,
}

/// A handwriting sample with its transcript.
#[derive(Clone, Debug, PartialEq)]
pub struct TranscribedSample {
    pub text: String,
    pub strokes: StrokeSequence,
}

impl TranscribedSample {
    pub fn new(text: impl Into<String>, strokes: StrokeSequence) -> Self {
        Self {
            text: text.into(),
            strokes,
        }
    }
}

/// Read a JSON sample list.
pub fn read_samples(path: &Path) -> Result<Vec<TranscribedSample>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let records: Vec<SampleRecord> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("invalid sample JSON in {}", path.display()))?;
    Ok(records
        .into_iter()
        .map(|r| TranscribedSample::new(r.text, StrokeSequence::from_triples(&r.strokes)))
        .collect())
}

pub fn write_samples(path: &Path, samples: &[TranscribedSample]) -> Result<()> {
    let records: Vec<SampleRecord> = samples
        .iter()
        .map(|s| SampleRecord {
            text: s.text.clone(),
            strokes: s.strokes.to_triples(),
        })
        .collect();
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &records)
        .with_context(|| format!("failed to write samples to {}", path.display()))?;
    Ok(())
}

/// One normalised training sequence with its padding mask.
///
/// `mask[t]` is 1.0 for real points and 0.0 for padding.  The loss of the
/// transition into point `t` is counted only when `mask[t]` is set.
#[derive(Clone, Debug)]
pub struct TrainingSample {
    pub strokes: StrokeSequence,
    pub text: Option<CharacterSequence>,
    pub mask: Vec<f32>,
}

impl TrainingSample {
    /// Unpadded sample: every point counts.
    pub fn new(strokes: StrokeSequence, text: Option<CharacterSequence>) -> Self {
        let mask = vec![1.0; strokes.len()];
        Self {
            strokes,
            text,
            mask,
        }
    }

    pub fn with_mask(
        strokes: StrokeSequence,
        text: Option<CharacterSequence>,
        mask: Vec<f32>,
    ) -> Result<Self> {
        if mask.len() != strokes.len() {
            bail!(
                "mask length {} does not match {} stroke points",
                mask.len(),
                strokes.len()
            );
        }
        Ok(Self {
            strokes,
            text,
            mask,
        })
    }

    /// Normalise `sample`'s offsets and encode its transcript when
    /// `conditional` is set.
    pub fn prepare(
        sample: &TranscribedSample,
        vocab: &Vocabulary,
        normalizer: &Normalizer,
        conditional: bool,
    ) -> Result<Self> {
        if sample.strokes.len() < 2 {
            bail!(
                "sample {:?} has {} points, need at least 2",
                sample.text,
                sample.strokes.len()
            );
        }
        let text = if conditional {
            Some(
                vocab
                    .encode_with_sentinel(&sample.text)
                    .with_context(|| format!("cannot encode transcript {:?}", sample.text))?,
            )
        } else {
            None
        };
        Ok(Self::new(normalizer.normalize(&sample.strokes), text))
    }

    /// Steps that contribute to the loss.
    pub fn valid_steps(&self) -> usize {
        self.mask.iter().skip(1).filter(|&&m| m > 0.5).count()
    }
}
