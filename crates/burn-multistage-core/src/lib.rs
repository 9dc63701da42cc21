//! Core building blocks for staged diffusion sampling
//!
//! - [`AnyTensor`] - float tensors whose rank is only known at run time
//! - [`Latent`] - latent samples plus optional batch index and noise mask
//! - [`noise`] - deterministic, seed-keyed noise generation
//! - [`channels`] - latent channel-count discovery and repair
//! - [`resample`] - grid alignment and bilinear resampling
//! - [`StageError`] - errors raised while running a single stage

pub mod channels;
pub mod debug;
pub mod error;
pub mod latent;
pub mod noise;
pub mod resample;
pub mod tensor;

pub use channels::{
    CHANNEL_PROBES, ChannelHints, ChannelProbe, ensure_channels, expected_channels, reconcile,
    reconcile_channels,
};
pub use debug::{DebugConfig, ensure_finite, tensor_stats};
pub use error::{CodecError, EngineError, StageError};
pub use latent::{Latent, NOISE_MASK_KEY, SAMPLES_KEY};
pub use noise::{MAX_BATCH_INDEX, NoiseSource, SeededNoise, seeded_noise};
pub use resample::{SPATIAL_GRID, grid_align, resize_bilinear};
pub use tensor::AnyTensor;
