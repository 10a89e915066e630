//! Top-level models: the unconditional prediction network and the
//! text-conditioned synthesis network.
//!
//! ```text
//! prediction:  point → RecurrentStack(context = ∅) → MixtureDensityHead
//! synthesis:   point → lstm_0 → AttentionWindow → lstm_1.. → MixtureDensityHead
//!                        ↑ window(t−1)     ↓ window(t)
//! ```
//!
//! Both share the recurrent core and the output head and differ only in
//! whether the attention window is wired in.  The kind is fixed at
//! construction.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{bail, Context, Result};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::config::{
    HIDDEN_SIZE, INPUT_SIZE, NUM_MIXTURES, N_LAYERS, OUTPUT_CLIP, RECURRENT_CLIP, WINDOW_MIXTURES,
};
use crate::data::{CharacterSequence, StrokePoint, StrokeSequence};

use super::mixture::{MixtureDensityHead, MixtureParameters};
use super::params::{ClipPolicy, GroupKind, ParamGroup};
use super::stack::RecurrentStack;
use super::state::{AlignmentState, RecurrentState};
use super::window::AttentionWindow;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Prediction,
    Synthesis,
}

/// Architecture hyper-parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub kind: ModelKind,
    pub input_size: usize,
    pub hidden_size: usize,
    pub n_layers: usize,

    /// Output mixture components.
    pub num_mixtures: usize,

    /// Attention mixture components.  Unused by the prediction model.
    pub window_mixtures: usize,

    /// Symbols in the conditioning vocabulary, null included.  Unused by the
    /// prediction model.
    pub vocab_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            kind: ModelKind::Prediction,
            input_size: INPUT_SIZE,
            hidden_size: HIDDEN_SIZE,
            n_layers: N_LAYERS,
            num_mixtures: NUM_MIXTURES,
            window_mixtures: WINDOW_MIXTURES,
            vocab_size: 0,
        }
    }
}

impl ModelConfig {
    pub fn prediction() -> Self {
        Self::default()
    }

    pub fn synthesis(vocab_size: usize) -> Self {
        Self {
            kind: ModelKind::Synthesis,
            vocab_size,
            ..Self::default()
        }
    }

    /// Width of the window vector fed alongside every step input.
    pub fn context_size(&self) -> usize {
        match self.kind {
            ModelKind::Prediction => 0,
            ModelKind::Synthesis => self.vocab_size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_size != INPUT_SIZE {
            bail!("input_size must be {}, got {}", INPUT_SIZE, self.input_size);
        }
        if self.hidden_size == 0 || self.n_layers == 0 || self.num_mixtures == 0 {
            bail!(
                "hidden_size, n_layers and num_mixtures must be positive (got {}, {}, {})",
                self.hidden_size,
                self.n_layers,
                self.num_mixtures
            );
        }
        if self.kind == ModelKind::Synthesis {
            if self.window_mixtures == 0 {
                bail!("synthesis model needs at least one window mixture");
            }
            if self.vocab_size < 2 {
                bail!(
                    "synthesis model needs a vocabulary beyond the null symbol (vocab_size {})",
                    self.vocab_size
                );
            }
        }
        Ok(())
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let config: Self = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("invalid model config in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn write_json_file(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("failed to write model config to {}", path.display()))?;
        Ok(())
    }
}

/// Interface the training driver needs from either model.
pub trait StrokeModel: Send + Sync {
    fn config(&self) -> &ModelConfig;

    /// Run a whole input sequence with every step fed the true previous
    /// point.  Returns one set of mixture parameters per input step.
    fn unroll(
        &self,
        inputs: &StrokeSequence,
        text: Option<&CharacterSequence>,
    ) -> Result<Vec<MixtureParameters>>;

    fn param_groups(&self) -> Vec<(GroupKind, &dyn ParamGroup)>;

    fn param_groups_mut(&mut self) -> Vec<(GroupKind, &mut dyn ParamGroup)>;

    fn clip_policy(&self, group: GroupKind) -> ClipPolicy;

    /// Validate every component against the stored config.
    fn check_shapes(&self) -> Result<()>;

    fn param_count(&self) -> usize {
        self.param_groups().iter().map(|(_, g)| g.param_count()).sum()
    }
}

// ---------------------------------------------------------------------------
// Prediction
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PredictionNet {
    pub config: ModelConfig,
    pub stack: RecurrentStack,
    pub head: MixtureDensityHead,
}

impl PredictionNet {
    pub fn new(config: ModelConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        if config.kind != ModelKind::Prediction {
            bail!("prediction network built from a {:?} config", config.kind);
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let stack = RecurrentStack::new(
            config.input_size,
            0,
            config.hidden_size,
            config.n_layers,
            &mut rng,
        );
        let head = MixtureDensityHead::new(config.hidden_size, config.num_mixtures, &mut rng);
        Ok(Self {
            config,
            stack,
            head,
        })
    }

    pub fn initial_state(&self) -> RecurrentState {
        self.stack.initial_state()
    }

    pub fn step(
        &self,
        input: &StrokePoint,
        state: &mut RecurrentState,
        bias: f32,
    ) -> Result<MixtureParameters> {
        let empty = Array1::zeros(0);
        let (h, _) = self
            .stack
            .step(&input.to_input(), &empty, state, |_| Ok(Array1::zeros(0)))?;
        Ok(self.head.forward(&h, bias))
    }
}

impl StrokeModel for PredictionNet {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn unroll(
        &self,
        inputs: &StrokeSequence,
        _text: Option<&CharacterSequence>,
    ) -> Result<Vec<MixtureParameters>> {
        let mut state = self.initial_state();
        inputs
            .points
            .iter()
            .map(|p| self.step(p, &mut state, 0.0))
            .collect()
    }

    fn param_groups(&self) -> Vec<(GroupKind, &dyn ParamGroup)> {
        let mut groups: Vec<(GroupKind, &dyn ParamGroup)> = self
            .stack
            .cells
            .iter()
            .enumerate()
            .map(|(l, c)| (GroupKind::Recurrent(l), c as &dyn ParamGroup))
            .collect();
        groups.push((GroupKind::Output, &self.head));
        groups
    }

    fn param_groups_mut(&mut self) -> Vec<(GroupKind, &mut dyn ParamGroup)> {
        let mut groups: Vec<(GroupKind, &mut dyn ParamGroup)> = self
            .stack
            .cells
            .iter_mut()
            .enumerate()
            .map(|(l, c)| (GroupKind::Recurrent(l), c as &mut dyn ParamGroup))
            .collect();
        groups.push((GroupKind::Output, &mut self.head));
        groups
    }

    fn clip_policy(&self, _group: GroupKind) -> ClipPolicy {
        ClipPolicy::Value(RECURRENT_CLIP)
    }

    fn check_shapes(&self) -> Result<()> {
        let c = &self.config;
        self.stack
            .check_shape(c.input_size, 0, c.hidden_size, c.n_layers)?;
        self.head.check_shape(c.hidden_size, c.num_mixtures)
    }
}

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

/// Everything a synthesis sequence carries from one step to the next.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SynthesisState {
    pub recurrent: RecurrentState,
    pub alignment: AlignmentState,
}

impl SynthesisState {
    pub fn is_healthy(&self) -> bool {
        self.recurrent.all_healthy() && self.alignment.is_healthy()
    }
}

/// One synthesis step's outputs.
#[derive(Clone, Debug)]
pub struct SynthesisStep {
    pub params: MixtureParameters,

    /// Alignment weights over the character positions.
    pub phi: Array1<f32>,

    pub finish: bool,

    /// Kappa of the dominant attention mixture.
    pub position: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SynthesisNet {
    pub config: ModelConfig,
    pub stack: RecurrentStack,
    pub window: AttentionWindow,
    pub head: MixtureDensityHead,
}

impl SynthesisNet {
    pub fn new(config: ModelConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        if config.kind != ModelKind::Synthesis {
            bail!("synthesis network built from a {:?} config", config.kind);
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let stack = RecurrentStack::new(
            config.input_size,
            config.vocab_size,
            config.hidden_size,
            config.n_layers,
            &mut rng,
        );
        let window = AttentionWindow::new(
            config.hidden_size,
            config.window_mixtures,
            config.vocab_size,
            &mut rng,
        );
        let head = MixtureDensityHead::new(config.hidden_size, config.num_mixtures, &mut rng);
        Ok(Self {
            config,
            stack,
            window,
            head,
        })
    }

    pub fn initial_state(&self) -> SynthesisState {
        SynthesisState {
            recurrent: self.stack.initial_state(),
            alignment: AlignmentState::new(self.config.window_mixtures, self.config.vocab_size),
        }
    }

    /// Advance one step against `text`.  The window is evaluated once,
    /// after the first layer, and its result both feeds the deeper layers
    /// and is stored as next step's context.
    pub fn step(
        &self,
        input: &StrokePoint,
        text: &CharacterSequence,
        state: &mut SynthesisState,
        bias: f32,
    ) -> Result<SynthesisStep> {
        let alignment = &mut state.alignment;
        let context = alignment.window.clone();
        let mut phi = Array1::zeros(0);

        let (h, window) = self.stack.step(
            &input.to_input(),
            &context,
            &mut state.recurrent,
            |h0| {
                let out = self.window.forward(h0, &alignment.kappa, text)?;
                alignment.kappa = out.kappa;
                alignment.alpha = out.alpha;
                alignment.finish = out.finish;
                phi = out.phi;
                Ok(out.window)
            },
        )?;
        alignment.window = window;

        Ok(SynthesisStep {
            params: self.head.forward(&h, bias),
            phi,
            finish: alignment.finish,
            position: alignment.dominant_position(),
        })
    }
}

impl StrokeModel for SynthesisNet {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn unroll(
        &self,
        inputs: &StrokeSequence,
        text: Option<&CharacterSequence>,
    ) -> Result<Vec<MixtureParameters>> {
        let text = match text {
            Some(t) => t,
            None => bail!("synthesis model needs a transcript for every sample"),
        };
        let mut state = self.initial_state();
        inputs
            .points
            .iter()
            .map(|p| self.step(p, text, &mut state, 0.0).map(|s| s.params))
            .collect()
    }

    fn param_groups(&self) -> Vec<(GroupKind, &dyn ParamGroup)> {
        let mut groups: Vec<(GroupKind, &dyn ParamGroup)> = self
            .stack
            .cells
            .iter()
            .enumerate()
            .map(|(l, c)| (GroupKind::Recurrent(l), c as &dyn ParamGroup))
            .collect();
        groups.push((GroupKind::Window, &self.window));
        groups.push((GroupKind::Output, &self.head));
        groups
    }

    fn param_groups_mut(&mut self) -> Vec<(GroupKind, &mut dyn ParamGroup)> {
        let mut groups: Vec<(GroupKind, &mut dyn ParamGroup)> = self
            .stack
            .cells
            .iter_mut()
            .enumerate()
            .map(|(l, c)| (GroupKind::Recurrent(l), c as &mut dyn ParamGroup))
            .collect();
        groups.push((GroupKind::Window, &mut self.window));
        groups.push((GroupKind::Output, &mut self.head));
        groups
    }

    fn clip_policy(&self, group: GroupKind) -> ClipPolicy {
        match group {
            GroupKind::Output => ClipPolicy::Value(OUTPUT_CLIP),
            GroupKind::Recurrent(_) | GroupKind::Window => ClipPolicy::Value(RECURRENT_CLIP),
        }
    }

    fn check_shapes(&self) -> Result<()> {
        let c = &self.config;
        self.stack
            .check_shape(c.input_size, c.vocab_size, c.hidden_size, c.n_layers)?;
        self.window
            .check_shape(c.hidden_size, c.window_mixtures, c.vocab_size)?;
        self.head.check_shape(c.hidden_size, c.num_mixtures)
    }
}

// ---------------------------------------------------------------------------
// Either model
// ---------------------------------------------------------------------------

/// A model of either kind, as persisted in a checkpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ModelWeights {
    Prediction(PredictionNet),
    Synthesis(SynthesisNet),
}

impl ModelWeights {
    /// Fresh randomly initialised model of the configured kind.
    pub fn from_config(config: ModelConfig, seed: u64) -> Result<Self> {
        Ok(match config.kind {
            ModelKind::Prediction => Self::Prediction(PredictionNet::new(config, seed)?),
            ModelKind::Synthesis => Self::Synthesis(SynthesisNet::new(config, seed)?),
        })
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Self::Prediction(_) => ModelKind::Prediction,
            Self::Synthesis(_) => ModelKind::Synthesis,
        }
    }

    pub fn as_model(&self) -> &dyn StrokeModel {
        match self {
            Self::Prediction(m) => m,
            Self::Synthesis(m) => m,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        self.as_model().config()
    }

    pub fn check_shapes(&self) -> Result<()> {
        if self.config().kind != self.kind() {
            bail!(
                "model stored as {:?} but configured as {:?}",
                self.kind(),
                self.config().kind
            );
        }
        self.config().validate()?;
        self.as_model().check_shapes()
    }
}
