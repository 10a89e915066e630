//! Autoregressive stroke generation.
//!
//! Per step:
//!   a) Feed the previous point (the origin at step 0) through the model
//!   b) Sharpen the mixture with `bias` and sample the next point
//!   c) Stop when attention has reached the end of the text, or after
//!      `seq_len` points
//!
//! Style priming first replays a real reference sample (true offsets as
//! inputs, nothing sampled) against its own transcript, then continues
//! against `reference + " " + text + "  "`.  Primed points are not part of
//! the output.

use anyhow::{bail, Context, Result};
use ndarray::Array1;
use rayon::prelude::*;

use crate::config::{
    DEFAULT_BIAS, DEFAULT_SEQ_LEN, PREVIEW_LEN, PREVIEW_TEXT, SENTINEL_LEN, TEXT_SENTINEL,
};
use crate::core::{ModelWeights, PredictionNet, SynthesisNet, SynthesisState};
use crate::data::{
    CharacterSequence, Normalizer, StrokePoint, StrokeSequence, TranscribedSample, Vocabulary,
};

use super::sampler::PenSampler;
use super::style::StyleBank;

/// What happens to the attention position once priming is done.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PrimingMode {
    /// Keep kappa where the reference transcript left it.
    #[default]
    Carry,
    /// Restart attention at the first character.
    Reset,
}

/// Generation parameters.
#[derive(Clone, Debug)]
pub struct GenerationConfig {
    /// Maximum number of generated points.
    pub seq_len: usize,

    /// Sampling sharpness, ≥ 0.
    pub bias: f32,

    /// Fixed seed for reproducible output.
    pub seed: Option<u64>,

    /// Reference sample to prime with.
    pub style_index: Option<usize>,

    pub priming: PrimingMode,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            seq_len: DEFAULT_SEQ_LEN,
            bias: DEFAULT_BIAS,
            seed: None,
            style_index: None,
            priming: PrimingMode::Carry,
        }
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.seq_len == 0 {
            bail!("seq_len must be positive");
        }
        if !self.bias.is_finite() || self.bias < 0.0 {
            bail!("bias must be a finite value ≥ 0, got {}", self.bias);
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Attention moved past the last character.
    Finished,
    /// `seq_len` points were produced.
    MaxLength,
}

/// Alignment diagnostics of one generated step.
#[derive(Clone, Copy, Debug)]
pub struct StepTrace {
    /// Kappa of the dominant attention mixture.
    pub position: f32,
    pub finish: bool,
}

#[derive(Clone, Debug)]
pub struct GenerationResult {
    /// Generated points, denormalised.
    pub strokes: StrokeSequence,

    /// Attention weights per generated step.  Empty for unconditional runs.
    pub phi: Vec<Array1<f32>>,

    /// Per-step alignment.  Empty for unconditional runs.
    pub trace: Vec<StepTrace>,

    /// Text the window attended over, sentinel included.
    pub conditioning: Option<String>,

    pub termination: Termination,

    /// Reference points replayed before generation.
    pub primed_steps: usize,

    pub elapsed_ms: f32,
}

impl GenerationResult {
    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }
}

/// Borrowing generator over a trained model.
pub struct Generator<'a> {
    model: &'a ModelWeights,
    normalizer: &'a Normalizer,
}

impl<'a> Generator<'a> {
    pub fn new(model: &'a ModelWeights, normalizer: &'a Normalizer) -> Self {
        Self { model, normalizer }
    }

    /// Free-running generation with the prediction model, optionally primed
    /// with a reference stroke sequence.
    pub fn unconditional(
        &self,
        config: &GenerationConfig,
        prime: Option<&StrokeSequence>,
    ) -> Result<GenerationResult> {
        config.validate()?;
        let net = self.prediction()?;
        if let Some(p) = prime {
            if p.is_empty() {
                bail!("priming strokes are empty");
            }
        }
        let start = std::time::Instant::now();
        tracing::info!(
            "Generating up to {} points unconditionally (bias {})",
            config.seq_len,
            config.bias
        );

        let mut state = net.initial_state();
        let mut input = StrokePoint::origin();
        let mut primed_steps = 0;
        if let Some(prime) = prime {
            for p in &self.normalizer.normalize(prime).points {
                net.step(&input, &mut state, 0.0)?;
                input = *p;
                primed_steps += 1;
            }
        }

        let mut sampler = PenSampler::new(config.seed);
        let mut out = StrokeSequence::default();
        for t in 0..config.seq_len {
            let params = net.step(&input, &mut state, config.bias)?;
            let point = sampler
                .sample(&params)
                .with_context(|| format!("sampling step {}", t))?;
            out.push(point);
            input = point;
        }
        if !state.all_healthy() {
            bail!("recurrent state diverged during generation");
        }

        let elapsed_ms = start.elapsed().as_secs_f32() * 1000.0;
        tracing::info!("Generated {} points in {:.1} ms", out.len(), elapsed_ms);

        Ok(GenerationResult {
            strokes: self.normalizer.denormalize(&out),
            phi: Vec::new(),
            trace: Vec::new(),
            conditioning: None,
            termination: Termination::MaxLength,
            primed_steps,
            elapsed_ms,
        })
    }

    /// Handwriting for `text`, optionally in the style of a reference
    /// sample.
    pub fn conditional(
        &self,
        vocab: &Vocabulary,
        text: &str,
        config: &GenerationConfig,
        style: Option<&TranscribedSample>,
    ) -> Result<GenerationResult> {
        config.validate()?;
        let net = self.synthesis()?;
        if text.is_empty() {
            bail!("conditioning text must not be empty");
        }
        if vocab.len() != net.config.vocab_size {
            bail!(
                "vocabulary has {} symbols, model expects {}",
                vocab.len(),
                net.config.vocab_size
            );
        }
        vocab.encode(text)?;

        let (full_text, conditioning, prime) = match style {
            Some(s) => {
                if s.strokes.is_empty() {
                    bail!("reference sample has no strokes");
                }
                let reference = vocab
                    .encode_plain(&s.text)
                    .context("cannot encode reference transcript")?;
                let full = vocab.encode_primed(&s.text, text)?;
                let joined = format!("{} {}", s.text, text);
                (full, joined, Some((reference, self.normalizer.normalize(&s.strokes))))
            }
            None => (vocab.encode_with_sentinel(text)?, text.to_string(), None),
        };

        let start = std::time::Instant::now();
        tracing::info!(
            "Generating {:?} ({} characters, up to {} points, bias {}, primed: {})",
            text,
            full_text.valid_len(),
            config.seq_len,
            config.bias,
            prime.is_some()
        );

        let mut state = net.initial_state();
        let mut input = StrokePoint::origin();
        let mut primed_steps = 0;
        if let Some((reference, strokes)) = &prime {
            for p in &strokes.points {
                net.step(&input, reference, &mut state, 0.0)?;
                input = *p;
                primed_steps += 1;
            }
            if config.priming == PrimingMode::Reset {
                state.alignment.reset_position();
            }
            tracing::debug!(
                "Primed {} steps, attention at {:.2}",
                primed_steps,
                state.alignment.dominant_position()
            );
        }

        let (out, phi, trace, termination) =
            self.decode(net, &full_text, &mut state, input, config)?;

        let elapsed_ms = start.elapsed().as_secs_f32() * 1000.0;
        match termination {
            Termination::Finished => tracing::info!(
                "Finished after {} points in {:.1} ms",
                out.len(),
                elapsed_ms
            ),
            Termination::MaxLength => tracing::warn!(
                "Reached seq_len {} before the end of the text",
                config.seq_len
            ),
        }

        let mut conditioning = conditioning;
        conditioning.push_str(TEXT_SENTINEL);
        Ok(GenerationResult {
            strokes: self.normalizer.denormalize(&out),
            phi,
            trace,
            conditioning: Some(conditioning),
            termination,
            primed_steps,
            elapsed_ms,
        })
    }

    /// Conditional generation with the style taken from `styles` by
    /// `config.style_index`.
    pub fn synthesize(
        &self,
        vocab: &Vocabulary,
        text: &str,
        config: &GenerationConfig,
        styles: Option<&StyleBank>,
    ) -> Result<GenerationResult> {
        let style = match (config.style_index, styles) {
            (Some(i), Some(bank)) => Some(bank.get(i)?),
            (Some(i), None) => bail!("style index {} given without a style bank", i),
            (None, _) => None,
        };
        self.conditional(vocab, text, config, style)
    }

    /// Independent requests in parallel.  Request `i` is seeded with
    /// `seed + i` when a seed is set.
    pub fn synthesize_many(
        &self,
        vocab: &Vocabulary,
        texts: &[String],
        config: &GenerationConfig,
        styles: Option<&StyleBank>,
    ) -> Vec<Result<GenerationResult>> {
        texts
            .par_iter()
            .enumerate()
            .map(|(i, text)| {
                let cfg = GenerationConfig {
                    seed: config.seed.map(|s| s.wrapping_add(i as u64)),
                    ..config.clone()
                };
                self.synthesize(vocab, text, &cfg, styles)
            })
            .collect()
    }

    /// Progress sample for a training run: `PREVIEW_TEXT` for synthesis
    /// models (characters missing from `vocab` are dropped) and
    /// `PREVIEW_LEN` free points for prediction models.
    pub fn preview(&self, vocab: &Vocabulary, seed: u64) -> Result<GenerationResult> {
        let config = GenerationConfig {
            seed: Some(seed),
            ..Default::default()
        };
        match self.model {
            ModelWeights::Prediction(_) => {
                let config = GenerationConfig {
                    seq_len: PREVIEW_LEN,
                    ..config
                };
                self.unconditional(&config, None)
            }
            ModelWeights::Synthesis(_) => {
                let text: String = PREVIEW_TEXT.chars().filter(|&c| vocab.contains(c)).collect();
                if text.trim().is_empty() {
                    bail!("vocabulary shares no characters with {:?}", PREVIEW_TEXT);
                }
                self.conditional(vocab, &text, &config, None)
            }
        }
    }

    fn decode(
        &self,
        net: &SynthesisNet,
        text: &CharacterSequence,
        state: &mut SynthesisState,
        mut input: StrokePoint,
        config: &GenerationConfig,
    ) -> Result<(StrokeSequence, Vec<Array1<f32>>, Vec<StepTrace>, Termination)> {
        let end = text.valid_len().saturating_sub(SENTINEL_LEN) as f32;
        let mut sampler = PenSampler::new(config.seed);
        let mut out = StrokeSequence::default();
        let mut phi = Vec::new();
        let mut trace = Vec::new();
        let mut termination = Termination::MaxLength;

        for t in 0..config.seq_len {
            let step = net.step(&input, text, state, config.bias)?;
            let point = sampler
                .sample(&step.params)
                .with_context(|| format!("sampling step {}", t))?;
            out.push(point);
            phi.push(step.phi);
            trace.push(StepTrace {
                position: step.position,
                finish: step.finish,
            });
            input = point;

            if (t + 1) % 100 == 0 {
                tracing::debug!("Step {}: attention at {:.2} of {}", t + 1, step.position, end);
            }
            if step.finish && step.position >= end {
                termination = Termination::Finished;
                break;
            }
        }
        if !state.is_healthy() {
            bail!("generation state diverged");
        }
        Ok((out, phi, trace, termination))
    }

    fn prediction(&self) -> Result<&'a PredictionNet> {
        match self.model {
            ModelWeights::Prediction(net) => Ok(net),
            ModelWeights::Synthesis(_) => {
                bail!("unconditional generation needs a prediction model")
            }
        }
    }

    fn synthesis(&self) -> Result<&'a SynthesisNet> {
        match self.model {
            ModelWeights::Synthesis(net) => Ok(net),
            ModelWeights::Prediction(_) => {
                bail!("conditional generation needs a synthesis model")
            }
        }
    }
}
