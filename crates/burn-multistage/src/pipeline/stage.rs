//! Stage configuration and resolution
//!
//! Callers describe stages with [`StageSpec`], leaving out anything that
//! should be inherited. [`resolve`] turns the list into immutable [`Stage`]s
//! once, before any stage runs.

use burn::prelude::*;
use tracing::debug;

use crate::error::PipelineError;
use crate::model::{CodecRef, Conditioning, ModelRef};
use crate::sampler::{SamplerType, ScheduleType};

/// Per-stage settings, every field optional
///
/// Model, codec and conditioning fall back to the previous stage's resolved
/// value. Sampler, scheduler, guidance and denoise fall back to
/// [`PipelineDefaults`].
#[derive(Clone)]
pub struct StageSettings<B: Backend> {
    pub model: Option<ModelRef<B>>,
    pub vae: Option<CodecRef<B>>,
    pub positive: Option<Conditioning<B>>,
    pub negative: Option<Conditioning<B>>,
    pub sampler: Option<SamplerType>,
    pub scheduler: Option<ScheduleType>,
    pub guidance_scale: Option<f64>,
    pub denoise: Option<f64>,
}

impl<B: Backend> Default for StageSettings<B> {
    fn default() -> Self {
        Self {
            model: None,
            vae: None,
            positive: None,
            negative: None,
            sampler: None,
            scheduler: None,
            guidance_scale: None,
            denoise: None,
        }
    }
}

macro_rules! settings_builders {
    ($($method:ident($field:ident: $ty:ty)),* $(,)?) => {
        $(
            pub fn $method(mut self, $field: $ty) -> Self {
                self.settings_mut().$field = Some($field);
                self
            }
        )*
    };
}

impl<B: Backend> StageSettings<B> {
    fn settings_mut(&mut self) -> &mut StageSettings<B> {
        self
    }

    settings_builders!(
        with_model(model: ModelRef<B>),
        with_vae(vae: CodecRef<B>),
        with_positive(positive: Conditioning<B>),
        with_negative(negative: Conditioning<B>),
        with_sampler(sampler: SamplerType),
        with_scheduler(scheduler: ScheduleType),
        with_guidance_scale(guidance_scale: f64),
        with_denoise(denoise: f64),
    );
}

/// Caller-facing description of one stage
#[derive(Clone)]
pub struct StageSpec<B: Backend> {
    /// Sampling steps; zero or negative skips the stage
    pub steps: i64,
    pub settings: StageSettings<B>,
}

impl<B: Backend> StageSpec<B> {
    pub fn new(steps: i64) -> Self {
        Self {
            steps,
            settings: StageSettings::default(),
        }
    }

    pub fn from_settings(steps: i64, settings: StageSettings<B>) -> Self {
        Self { steps, settings }
    }

    fn settings_mut(&mut self) -> &mut StageSettings<B> {
        &mut self.settings
    }

    settings_builders!(
        with_model(model: ModelRef<B>),
        with_vae(vae: CodecRef<B>),
        with_positive(positive: Conditioning<B>),
        with_negative(negative: Conditioning<B>),
        with_sampler(sampler: SamplerType),
        with_scheduler(scheduler: ScheduleType),
        with_guidance_scale(guidance_scale: f64),
        with_denoise(denoise: f64),
    );
}

/// Pipeline-level values stages fall back to
#[derive(Clone)]
pub struct PipelineDefaults<B: Backend> {
    /// Conditioning for the first stage when it names none
    pub positive: Option<Conditioning<B>>,
    pub negative: Option<Conditioning<B>>,
    /// Stage i runs with `seed + i`
    pub seed: u64,
    pub sampler: SamplerType,
    pub scheduler: ScheduleType,
    pub guidance_scale: f64,
    /// Denoising strength (1.0 = full generation, <1.0 = partial)
    pub denoise: f64,
}

impl<B: Backend> Default for PipelineDefaults<B> {
    fn default() -> Self {
        Self {
            positive: None,
            negative: None,
            seed: 0,
            sampler: SamplerType::default(),
            scheduler: ScheduleType::default(),
            guidance_scale: 7.5,
            denoise: 1.0,
        }
    }
}

impl<B: Backend> PipelineDefaults<B> {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_conditioning(mut self, positive: Conditioning<B>, negative: Conditioning<B>) -> Self {
        self.positive = Some(positive);
        self.negative = Some(negative);
        self
    }
}

/// A fully resolved, immutable stage
#[derive(Clone)]
pub struct Stage<B: Backend> {
    pub index: usize,
    /// Always present for stages that run
    pub model: Option<ModelRef<B>>,
    pub vae: Option<CodecRef<B>>,
    pub positive: Option<Conditioning<B>>,
    pub negative: Option<Conditioning<B>>,
    /// Zero for skipped stages
    pub steps: usize,
    pub sampler: SamplerType,
    pub scheduler: ScheduleType,
    pub guidance_scale: f64,
    pub denoise: f64,
    pub seed: u64,
}

impl<B: Backend> Stage<B> {
    pub fn is_skipped(&self) -> bool {
        self.steps == 0
    }
}

impl<B: Backend> std::fmt::Debug for Stage<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("index", &self.index)
            .field("model", &self.model.as_ref().map(|m| m.name().to_string()))
            .field("vae", &self.vae.is_some())
            .field("steps", &self.steps)
            .field("sampler", &self.sampler)
            .field("scheduler", &self.scheduler)
            .field("guidance_scale", &self.guidance_scale)
            .field("denoise", &self.denoise)
            .field("seed", &self.seed)
            .finish()
    }
}

/// Resolve stage specs against pipeline defaults
///
/// Fails on an empty list, on a stage that would run without a model, and
/// on out-of-range guidance or denoise values. Skipped stages still pass
/// their model, codec and conditioning on to later stages but are not
/// validated.
pub fn resolve<B: Backend>(
    specs: &[StageSpec<B>],
    defaults: &PipelineDefaults<B>,
) -> Result<Vec<Stage<B>>, PipelineError> {
    if specs.is_empty() {
        return Err(PipelineError::EmptyPipeline);
    }

    let mut stages: Vec<Stage<B>> = Vec::with_capacity(specs.len());
    for (index, spec) in specs.iter().enumerate() {
        let settings = &spec.settings;
        let prev = stages.last();

        let model = settings
            .model
            .clone()
            .or_else(|| prev.and_then(|p| p.model.clone()));
        let vae = settings.vae.clone().or_else(|| prev.and_then(|p| p.vae.clone()));
        let positive = settings.positive.clone().or_else(|| match prev {
            Some(p) => p.positive.clone(),
            None => defaults.positive.clone(),
        });
        let negative = settings.negative.clone().or_else(|| match prev {
            Some(p) => p.negative.clone(),
            None => defaults.negative.clone(),
        });

        let stage = Stage {
            index,
            model,
            vae,
            positive,
            negative,
            steps: usize::try_from(spec.steps).unwrap_or(0),
            sampler: settings.sampler.unwrap_or(defaults.sampler),
            scheduler: settings.scheduler.unwrap_or(defaults.scheduler),
            guidance_scale: settings.guidance_scale.unwrap_or(defaults.guidance_scale),
            denoise: settings.denoise.unwrap_or(defaults.denoise),
            seed: defaults.seed.wrapping_add(index as u64),
        };

        if !stage.is_skipped() {
            validate(&stage)?;
        }
        debug!(?stage, "resolved stage");
        stages.push(stage);
    }

    Ok(stages)
}

fn validate<B: Backend>(stage: &Stage<B>) -> Result<(), PipelineError> {
    let invalid = |reason: String| PipelineError::InvalidStage {
        stage: stage.index,
        reason,
    };

    if stage.model.is_none() {
        return Err(PipelineError::MissingModel { stage: stage.index });
    }
    if !(0.0..=1.0).contains(&stage.denoise) {
        return Err(invalid(format!(
            "denoise strength {} outside [0, 1]",
            stage.denoise
        )));
    }
    if !stage.guidance_scale.is_finite() || stage.guidance_scale < 0.0 {
        return Err(invalid(format!(
            "guidance scale {} must be finite and non-negative",
            stage.guidance_scale
        )));
    }
    Ok(())
}
