//! scrivener: handwriting synthesis from the command line.
//!
//! This is the CLI binary entry point.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use scrivener::core::{ModelConfig, ModelKind, ModelWeights, StrokeModel};
use scrivener::data::{read_samples, Normalizer, TrainingSample, Vocabulary};
use scrivener::generation::{GenerationConfig, Generator, PrimingMode, StyleBank, Termination};
use scrivener::runtime::Checkpoint;
use scrivener::training::{Trainer, TrainerConfig};

/// scrivener CLI.
#[derive(Parser, Debug)]
#[command(
    name = "scrivener",
    about = "scrivener: handwriting synthesis with an attention-conditioned pen model",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a stroke sequence from a checkpoint.
    Generate {
        /// Trained checkpoint.
        #[arg(short, long)]
        checkpoint: PathBuf,

        /// Text to write.  Required for synthesis checkpoints.
        #[arg(short, long)]
        text: Option<String>,

        /// Maximum number of generated points.
        #[arg(short = 'n', long, default_value_t = scrivener::config::DEFAULT_SEQ_LEN)]
        seq_len: usize,

        /// Sampling bias; larger values give neater handwriting.
        #[arg(short, long, default_value_t = scrivener::config::DEFAULT_BIAS)]
        bias: f32,

        /// Fixed random seed.
        #[arg(long)]
        seed: Option<u64>,

        /// Style bank (JSON list of {text, strokes}).
        #[arg(long)]
        styles: Option<PathBuf>,

        /// Index of the style sample to prime with.
        #[arg(long)]
        style: Option<usize>,

        /// Attention position after priming.
        #[arg(long, value_enum, default_value_t = Priming::Carry)]
        priming: Priming,

        /// Model config JSON the checkpoint must match.
        #[arg(long)]
        model_config: Option<PathBuf>,

        /// Output file for the `[pen_lift, dx, dy]` JSON.
        #[arg(short, long, default_value = "generated_seq.json")]
        out: PathBuf,
    },

    /// Create a fresh checkpoint from a sample set.
    Init {
        /// Training samples (JSON list of {text, strokes}).
        #[arg(short, long)]
        data: PathBuf,

        #[arg(short, long, value_enum, default_value_t = Kind::Synthesis)]
        kind: Kind,

        /// Model config JSON overriding the default architecture.
        #[arg(long)]
        model_config: Option<PathBuf>,

        #[arg(long, default_value_t = 0)]
        seed: u64,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Train a checkpoint with forward-gradient updates.
    Train {
        #[arg(short, long)]
        checkpoint: PathBuf,

        #[arg(short, long)]
        data: PathBuf,

        /// Validation samples.
        #[arg(long)]
        valid: Option<PathBuf>,

        /// Where the best checkpoint is written.
        #[arg(short, long)]
        out: PathBuf,

        #[arg(long, default_value_t = 100)]
        epochs: usize,

        #[arg(long, default_value_t = 32)]
        batch_size: usize,

        #[arg(long, default_value_t = 1e-3)]
        lr: f32,

        /// Epochs between learning-rate decays; 0 disables decay.
        #[arg(long, default_value_t = 100)]
        step_size: usize,

        /// Tangent samples per parameter group.
        #[arg(long, default_value_t = 8)]
        tangents: usize,

        #[arg(long, default_value_t = 15)]
        patience: usize,

        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Priming {
    Carry,
    Reset,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Kind {
    Prediction,
    Synthesis,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    tracing::info!("scrivener v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Generate {
            checkpoint,
            text,
            seq_len,
            bias,
            seed,
            styles,
            style,
            priming,
            model_config,
            out,
        } => {
            let config = GenerationConfig {
                seq_len,
                bias,
                seed,
                style_index: style,
                priming: match priming {
                    Priming::Carry => PrimingMode::Carry,
                    Priming::Reset => PrimingMode::Reset,
                },
            };
            generate(
                &checkpoint,
                model_config.as_deref(),
                text.as_deref(),
                styles.as_deref(),
                &config,
                &out,
            )
        }
        Command::Init {
            data,
            kind,
            model_config,
            seed,
            out,
        } => init(&data, kind, model_config.as_deref(), seed, &out),
        Command::Train {
            checkpoint,
            data,
            valid,
            out,
            epochs,
            batch_size,
            lr,
            step_size,
            tangents,
            patience,
            seed,
        } => {
            let config = TrainerConfig {
                epochs,
                batch_size,
                learning_rate: lr,
                step_size: if step_size == 0 { None } else { Some(step_size) },
                tangent_samples: tangents,
                patience,
                seed,
                ..Default::default()
            };
            train(&checkpoint, &data, valid.as_deref(), &out, config)
        }
    }
}

fn generate(
    checkpoint: &Path,
    model_config: Option<&Path>,
    text: Option<&str>,
    styles: Option<&Path>,
    config: &GenerationConfig,
    out: &Path,
) -> Result<()> {
    let ckpt = match model_config {
        Some(p) => Checkpoint::load_expecting(checkpoint, &ModelConfig::from_json_file(p)?)?,
        None => Checkpoint::load(checkpoint)?,
    };
    let generator = Generator::new(&ckpt.model, &ckpt.normalizer);
    let bank = styles.map(StyleBank::load).transpose()?;

    let result = match (ckpt.model.kind(), text) {
        (ModelKind::Synthesis, Some(t)) => {
            generator.synthesize(&ckpt.vocabulary, t, config, bank.as_ref())?
        }
        (ModelKind::Synthesis, None) => bail!("a synthesis checkpoint needs --text"),
        (ModelKind::Prediction, t) => {
            if t.is_some() {
                tracing::warn!("prediction checkpoint ignores --text");
            }
            let prime = match (config.style_index, &bank) {
                (Some(i), Some(b)) => Some(&b.get(i)?.strokes),
                (Some(i), None) => bail!("style index {} given without --styles", i),
                (None, _) => None,
            };
            generator.unconditional(config, prime)?
        }
    };

    if result.termination == Termination::MaxLength && ckpt.model.kind() == ModelKind::Synthesis {
        tracing::info!("Stopped at seq_len; raise --seq-len for longer text");
    }
    result.strokes.write_json(out)?;
    tracing::info!(
        "Wrote {} points ({} pen strokes) to {}",
        result.len(),
        result.strokes.to_polylines().len(),
        out.display()
    );
    Ok(())
}

fn init(data: &Path, kind: Kind, model_config: Option<&Path>, seed: u64, out: &Path) -> Result<()> {
    let samples = read_samples(data)?;
    if samples.is_empty() {
        bail!("no samples in {}", data.display());
    }
    let texts: Vec<&str> = samples.iter().map(|s| s.text.as_str()).collect();
    let vocabulary = Vocabulary::from_transcripts(&texts);
    let strokes: Vec<_> = samples.iter().map(|s| s.strokes.clone()).collect();
    let normalizer = Normalizer::fit(&strokes)?;

    let mut config = match model_config {
        Some(p) => ModelConfig::from_json_file(p)?,
        None => ModelConfig::default(),
    };
    config.kind = match kind {
        Kind::Prediction => ModelKind::Prediction,
        Kind::Synthesis => ModelKind::Synthesis,
    };
    if config.kind == ModelKind::Synthesis {
        config.vocab_size = vocabulary.len();
    }

    tracing::info!(
        "Vocabulary of {} symbols, offsets mean {:?} std {:?}",
        vocabulary.len(),
        normalizer.mean,
        normalizer.std
    );
    let model = ModelWeights::from_config(config, seed)?;
    Checkpoint::new(model, normalizer, vocabulary).save(out)
}

fn train(
    checkpoint: &Path,
    data: &Path,
    valid: Option<&Path>,
    out: &Path,
    config: TrainerConfig,
) -> Result<()> {
    let ckpt = Checkpoint::load(checkpoint)?;
    let conditional = ckpt.model.kind() == ModelKind::Synthesis;
    let prepare = |path: &Path| -> Result<Vec<TrainingSample>> {
        read_samples(path)?
            .iter()
            .map(|s| TrainingSample::prepare(s, &ckpt.vocabulary, &ckpt.normalizer, conditional))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("preparing samples from {}", path.display()))
    };
    let train_set = prepare(data)?;
    let valid_set = match valid {
        Some(p) => prepare(p)?,
        None => Vec::new(),
    };

    let seed = config.seed;
    let mut trainer = Trainer::new(config)?;
    let Checkpoint {
        model,
        normalizer,
        vocabulary,
        ..
    } = ckpt;
    let report = match model {
        ModelWeights::Prediction(mut net) => {
            fit(&mut trainer, &mut net, &train_set, &valid_set, |m, epoch| {
                let model = ModelWeights::Prediction(m.clone());
                save_best(Checkpoint::new(model, normalizer, vocabulary.clone()), out, epoch, seed)
            })?
        }
        ModelWeights::Synthesis(mut net) => {
            fit(&mut trainer, &mut net, &train_set, &valid_set, |m, epoch| {
                let model = ModelWeights::Synthesis(m.clone());
                save_best(Checkpoint::new(model, normalizer, vocabulary.clone()), out, epoch, seed)
            })?
        }
    };
    tracing::info!(
        "Best validation loss {:.3} at epoch {:?}",
        report.best_loss,
        report.best_epoch
    );
    Ok(())
}

/// Save an improved checkpoint and write a preview sample next to it.
fn save_best(ckpt: Checkpoint, out: &Path, epoch: usize, seed: u64) -> Result<()> {
    tracing::info!("Saving best model from epoch {}", epoch);
    ckpt.save(out)?;
    let preview = out.with_extension(format!("epoch{}.json", epoch));
    match Generator::new(&ckpt.model, &ckpt.normalizer).preview(&ckpt.vocabulary, seed) {
        Ok(result) => {
            result.strokes.write_json(&preview)?;
            tracing::info!("Wrote preview to {}", preview.display());
        }
        Err(e) => tracing::warn!("Skipping preview: {:#}", e),
    }
    Ok(())
}

fn fit<M, F>(
    trainer: &mut Trainer,
    model: &mut M,
    train: &[TrainingSample],
    valid: &[TrainingSample],
    mut save: F,
) -> Result<scrivener::training::TrainingReport>
where
    M: StrokeModel + Clone,
    F: FnMut(&M, usize) -> Result<()>,
{
    trainer.fit(model, train, valid, |m, report| save(m, report.epoch))
}
