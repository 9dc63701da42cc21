//! burn-multistage: Staged Diffusion Sampling
//!
//! Runs an ordered list of denoising stages, each refining the latent of the
//! one before. Stages may switch between models with incompatible latent
//! spaces; the latent is then decoded with the old model's codec, brought
//! onto the new encoder's pixel grid and re-encoded.
//!
//! The diffusion forward pass itself is not part of this crate. Hosts plug
//! in a [`DenoisingEngine`] and hand over models and codecs as shared
//! handles.
//!
//! # Backend Selection
//!
//! Choose a backend via feature flags:
//! - `ndarray`: CPU backend (default)
//! - `tch`: PyTorch backend via libtorch
//! - `wgpu`: WebGPU backend (cross-platform GPU)
//! - `cuda`: Native CUDA backend (NVIDIA only)
//!
//! # Example
//!
//! ```ignore
//! use burn_multistage::{Orchestrator, PipelineDefaults, SeededNoise, StepSwitch, StageSettings};
//!
//! let device = burn_multistage::backends::default_device();
//! let preset = StepSwitch::new(30, 20)
//!     .with_before(StageSettings::default().with_model(base).with_vae(base_vae))
//!     .with_after(StageSettings::default().with_model(video).with_vae(video_vae));
//!
//! let orchestrator = Orchestrator::new(&engine, &SeededNoise, &device);
//! let latent = orchestrator.run(&preset.stages(), &PipelineDefaults::default().with_seed(42), None)?;
//! ```

pub mod backends;
pub mod bridge;
pub mod config;
pub mod control;
pub mod error;
pub mod executor;
pub mod model;
pub mod pipeline;
pub mod sampler;

pub use burn_multistage_core::{
    AnyTensor, ChannelHints, CodecError, DebugConfig, EngineError, Latent, NoiseSource,
    SeededNoise, StageError,
};

pub use bridge::{Bridged, bridge, bridge_latent};
pub use config::{HandleRegistry, PipelineConfig, PipelineRequest, PlanConfig};
pub use control::PipelineControl;
pub use error::PipelineError;
pub use executor::{ExecutorOptions, StageExecutor, StageInput};
pub use model::{
    CodecRef, Conditioning, DenoiseRequest, DenoisingEngine, DiffusionModel, LatentCodec,
    ModelRef, same_handle,
};
pub use pipeline::{
    MultiStep, Orchestrator, PipelineDefaults, Stage, StageEvent, StageSettings, StageSpec,
    StageState, StepSwitch, resolve,
};
pub use sampler::{SamplerType, ScheduleType};
