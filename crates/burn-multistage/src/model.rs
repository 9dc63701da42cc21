//! Interfaces to the external collaborators
//!
//! Models, codecs and the denoising engine are owned by the host. The
//! orchestrator only holds shared handles to them, reads their metadata and
//! calls them; it never constructs, mutates or frees them.

use std::sync::Arc;

use burn::prelude::*;
use burn_multistage_core::{AnyTensor, ChannelHints, CodecError, EngineError};

use crate::sampler::{SamplerType, ScheduleType};

/// A generative model as seen by the orchestrator
pub trait DiffusionModel<B: Backend>: ChannelHints + Send + Sync {
    /// Human-readable name used in logs
    fn name(&self) -> &str {
        "model"
    }

    /// Device the model is loaded on, if it reports one
    fn device(&self) -> Option<B::Device> {
        None
    }
}

/// Encoder/decoder pair converting between pixel space and a latent space
pub trait LatentCodec<B: Backend>: Send + Sync {
    /// Decode a `[B, C, H, W]` latent to pixels
    ///
    /// Image codecs usually return `[B, H, W, C]`, video codecs
    /// `[B, F, H, W, C]`. `None` means decoding failed.
    fn decode(&self, latent: Tensor<B, 4>) -> Option<AnyTensor<B>>;

    /// Encode `[B, H, W, C]` pixels to a latent
    fn encode(&self, pixels: Tensor<B, 4>) -> Result<AnyTensor<B>, CodecError>;
}

/// Shared handle to a model
pub type ModelRef<B> = Arc<dyn DiffusionModel<B>>;

/// Shared handle to a codec
pub type CodecRef<B> = Arc<dyn LatentCodec<B>>;

/// True if both handles point to the same underlying object
///
/// Handles are opaque, so two distinct objects with identical weights still
/// count as different.
pub fn same_handle<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    Arc::ptr_eq(a, b)
}

/// Text conditioning for one side of classifier-free guidance
#[derive(Debug, Clone)]
pub struct Conditioning<B: Backend> {
    /// Token embeddings [batch, seq_len, embed_dim]
    pub context: Tensor<B, 3>,
    /// Pooled embedding [batch, embed_dim], for models that use one
    pub pooled: Option<Tensor<B, 2>>,
}

impl<B: Backend> Conditioning<B> {
    pub fn new(context: Tensor<B, 3>) -> Self {
        Self {
            context,
            pooled: None,
        }
    }

    pub fn with_pooled(mut self, pooled: Tensor<B, 2>) -> Self {
        self.pooled = Some(pooled);
        self
    }
}

/// Everything the denoising engine receives for one stage
pub struct DenoiseRequest<'a, B: Backend> {
    pub model: &'a dyn DiffusionModel<B>,
    /// Initial noise, same shape as `latent`
    pub noise: Tensor<B, 4>,
    pub positive: Option<&'a Conditioning<B>>,
    pub negative: Option<&'a Conditioning<B>>,
    pub guidance_scale: f64,
    pub sampler: SamplerType,
    pub scheduler: ScheduleType,
    /// Latent to refine, `[B, C, H, W]` with the model's channel count
    pub latent: Tensor<B, 4>,
    /// Fraction of the noise schedule to run (1.0 = full denoise)
    pub denoise: f64,
    pub seed: u64,
    /// Number of sampling steps (always >= 1)
    pub steps: usize,
    pub noise_mask: Option<Tensor<B, 4>>,
    pub device: &'a B::Device,
}

/// The sampler that actually runs the diffusion model
///
/// Must be deterministic for identical requests. The call may block for a
/// long time; it is never cancelled or timed out by the orchestrator.
pub trait DenoisingEngine<B: Backend> {
    fn denoise(&self, request: DenoiseRequest<'_, B>) -> Result<Tensor<B, 4>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl ChannelHints for Named {}

    impl<B: Backend> DiffusionModel<B> for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    type TestBackend = burn_ndarray::NdArray<f32>;

    #[test]
    fn test_identity_not_value_equality() {
        let a: ModelRef<TestBackend> = Arc::new(Named("sdxl"));
        let b: ModelRef<TestBackend> = Arc::new(Named("sdxl"));
        let a2 = a.clone();
        assert!(same_handle(&a, &a2));
        assert!(!same_handle(&a, &b));
    }
}
