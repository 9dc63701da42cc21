//! JSON pipeline descriptions
//!
//! A [`PipelineConfig`] names models, codecs and conditioning by key. A
//! [`HandleRegistry`] holds the live handles for those keys and turns the
//! config into stage specs the orchestrator can run.
//!
//! ```json
//! {
//!   "seed": 42,
//!   "positive": "prompt",
//!   "negative": "empty",
//!   "plan": {
//!     "kind": "step_switch",
//!     "total_steps": 30,
//!     "switch_point": 20,
//!     "before": { "model": "base", "vae": "base_vae" },
//!     "after": { "model": "video", "vae": "video_vae", "sampler": "dpmpp_2m" }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::model::{CodecRef, Conditioning, ModelRef};
use crate::pipeline::{MultiStep, PipelineDefaults, StageSettings, StageSpec, StepSwitch};
use crate::sampler::{SamplerType, ScheduleType};

/// Settings of one stage, handles given by registry key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSettingsConfig {
    pub model: Option<String>,
    pub vae: Option<String>,
    pub positive: Option<String>,
    pub negative: Option<String>,
    pub sampler: Option<SamplerType>,
    pub scheduler: Option<ScheduleType>,
    pub guidance_scale: Option<f64>,
    pub denoise: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub steps: i64,
    #[serde(flatten)]
    pub settings: StageSettingsConfig,
}

/// How the stage list is laid out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanConfig {
    /// Explicit list of stages
    Stages { stages: Vec<StageConfig> },
    /// Two stages split at `switch_point`
    StepSwitch {
        #[serde(default = "default_total_steps")]
        total_steps: i64,
        #[serde(default = "default_switch_point")]
        switch_point: i64,
        #[serde(default)]
        before: StageSettingsConfig,
        #[serde(default)]
        after: StageSettingsConfig,
    },
    /// Three consecutive stages
    MultiStep {
        #[serde(default = "default_multi_steps")]
        steps: [i64; 3],
        #[serde(default)]
        stages: [StageSettingsConfig; 3],
    },
}

fn default_total_steps() -> i64 {
    20
}

fn default_switch_point() -> i64 {
    10
}

fn default_multi_steps() -> [i64; 3] {
    [10; 3]
}

/// Top-level pipeline description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub seed: u64,
    /// Pipeline-level conditioning keys
    #[serde(default)]
    pub positive: Option<String>,
    #[serde(default)]
    pub negative: Option<String>,
    #[serde(default)]
    pub sampler: Option<SamplerType>,
    #[serde(default)]
    pub scheduler: Option<ScheduleType>,
    #[serde(default)]
    pub guidance_scale: Option<f64>,
    #[serde(default)]
    pub denoise: Option<f64>,
    pub plan: PlanConfig,
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, PipelineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Look up every key in `registry` and build the stage list
    pub fn build<B: Backend>(
        &self,
        registry: &HandleRegistry<B>,
    ) -> Result<PipelineRequest<B>, PipelineError> {
        let fallback = PipelineDefaults::<B>::default();
        let defaults = PipelineDefaults {
            positive: registry.lookup_conditioning(self.positive.as_deref())?,
            negative: registry.lookup_conditioning(self.negative.as_deref())?,
            seed: self.seed,
            sampler: self.sampler.unwrap_or(fallback.sampler),
            scheduler: self.scheduler.unwrap_or(fallback.scheduler),
            guidance_scale: self.guidance_scale.unwrap_or(fallback.guidance_scale),
            denoise: self.denoise.unwrap_or(fallback.denoise),
        };

        let stages = match &self.plan {
            PlanConfig::Stages { stages } => stages
                .iter()
                .map(|stage| {
                    Ok(StageSpec::from_settings(
                        stage.steps,
                        registry.settings(&stage.settings)?,
                    ))
                })
                .collect::<Result<Vec<_>, PipelineError>>()?,
            PlanConfig::StepSwitch {
                total_steps,
                switch_point,
                before,
                after,
            } => StepSwitch::<B>::new(*total_steps, *switch_point)
                .with_before(registry.settings(before)?)
                .with_after(registry.settings(after)?)
                .stages(),
            PlanConfig::MultiStep { steps, stages } => {
                let mut preset = MultiStep::<B>::default().with_steps(*steps);
                for (index, settings) in stages.iter().enumerate() {
                    preset = preset.with_stage(index, registry.settings(settings)?);
                }
                preset.stages()
            }
        };

        Ok(PipelineRequest { stages, defaults })
    }
}

/// Stage specs and defaults built from a config
#[derive(Clone)]
pub struct PipelineRequest<B: Backend> {
    pub stages: Vec<StageSpec<B>>,
    pub defaults: PipelineDefaults<B>,
}

/// Live handles addressable by config keys
pub struct HandleRegistry<B: Backend> {
    models: HashMap<String, ModelRef<B>>,
    codecs: HashMap<String, CodecRef<B>>,
    conditionings: HashMap<String, Conditioning<B>>,
}

impl<B: Backend> Default for HandleRegistry<B> {
    fn default() -> Self {
        Self {
            models: HashMap::new(),
            codecs: HashMap::new(),
            conditionings: HashMap::new(),
        }
    }
}

impl<B: Backend> HandleRegistry<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, name: impl Into<String>, model: ModelRef<B>) -> Self {
        self.models.insert(name.into(), model);
        self
    }

    pub fn with_codec(mut self, name: impl Into<String>, codec: CodecRef<B>) -> Self {
        self.codecs.insert(name.into(), codec);
        self
    }

    pub fn with_conditioning(mut self, name: impl Into<String>, cond: Conditioning<B>) -> Self {
        self.conditionings.insert(name.into(), cond);
        self
    }

    pub fn model(&self, name: &str) -> Result<ModelRef<B>, PipelineError> {
        lookup(&self.models, "model", name).cloned()
    }

    pub fn codec(&self, name: &str) -> Result<CodecRef<B>, PipelineError> {
        lookup(&self.codecs, "codec", name).cloned()
    }

    pub fn conditioning(&self, name: &str) -> Result<Conditioning<B>, PipelineError> {
        lookup(&self.conditionings, "conditioning", name).cloned()
    }

    fn lookup_conditioning(
        &self,
        name: Option<&str>,
    ) -> Result<Option<Conditioning<B>>, PipelineError> {
        name.map(|name| self.conditioning(name)).transpose()
    }

    fn settings(&self, config: &StageSettingsConfig) -> Result<StageSettings<B>, PipelineError> {
        Ok(StageSettings {
            model: config.model.as_deref().map(|n| self.model(n)).transpose()?,
            vae: config.vae.as_deref().map(|n| self.codec(n)).transpose()?,
            positive: self.lookup_conditioning(config.positive.as_deref())?,
            negative: self.lookup_conditioning(config.negative.as_deref())?,
            sampler: config.sampler,
            scheduler: config.scheduler,
            guidance_scale: config.guidance_scale,
            denoise: config.denoise,
        })
    }
}

fn lookup<'a, T>(
    map: &'a HashMap<String, T>,
    kind: &'static str,
    name: &str,
) -> Result<&'a T, PipelineError> {
    map.get(name).ok_or_else(|| PipelineError::UnknownHandle {
        kind,
        name: name.to_string(),
    })
}
