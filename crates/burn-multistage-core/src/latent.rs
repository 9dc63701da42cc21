//! Latent container passed between stages

use std::collections::HashMap;

use burn::prelude::*;

use crate::error::StageError;
use crate::tensor::AnyTensor;

/// Key under which a keyed latent container stores its samples
pub const SAMPLES_KEY: &str = "samples";
/// Key under which a keyed latent container stores its noise mask
pub const NOISE_MASK_KEY: &str = "noise_mask";

/// A latent tensor plus the optional extras a host may attach to it
///
/// Latents are never mutated in place: every stage and every bridge returns a
/// new value that carries only `samples`.
#[derive(Debug, Clone)]
pub struct Latent<B: Backend> {
    /// Latent samples, usually `[B, C, H, W]`
    pub samples: AnyTensor<B>,
    /// Per-sample noise indices into a larger batch
    pub batch_index: Option<Vec<usize>>,
    /// Denoise mask forwarded to the engine
    pub noise_mask: Option<Tensor<B, 4>>,
}

impl<B: Backend> Latent<B> {
    pub fn new(samples: impl Into<AnyTensor<B>>) -> Self {
        Self {
            samples: samples.into(),
            batch_index: None,
            noise_mask: None,
        }
    }

    pub fn with_batch_index(mut self, batch_index: Vec<usize>) -> Self {
        self.batch_index = Some(batch_index);
        self
    }

    pub fn with_noise_mask(mut self, mask: Tensor<B, 4>) -> Self {
        self.noise_mask = Some(mask);
        self
    }

    pub fn dims(&self) -> Vec<usize> {
        self.samples.dims()
    }
}

impl<B: Backend, const D: usize> From<Tensor<B, D>> for Latent<B>
where
    AnyTensor<B>: From<Tensor<B, D>>,
{
    fn from(tensor: Tensor<B, D>) -> Self {
        Latent::new(tensor)
    }
}

impl<B: Backend> TryFrom<HashMap<String, AnyTensor<B>>> for Latent<B> {
    type Error = StageError;

    /// Unwrap a keyed container holding the tensor under `"samples"`
    fn try_from(mut entries: HashMap<String, AnyTensor<B>>) -> Result<Self, Self::Error> {
        let samples = entries.remove(SAMPLES_KEY).ok_or_else(|| {
            StageError::invalid_latent(format!(
                "keyed latent has no '{}' entry (keys: {:?})",
                SAMPLES_KEY,
                entries.keys().collect::<Vec<_>>()
            ))
        })?;

        let noise_mask = match entries.remove(NOISE_MASK_KEY) {
            Some(mask) => Some(mask.into_bchw()?),
            None => None,
        };

        Ok(Self {
            samples,
            batch_index: None,
            noise_mask,
        })
    }
}
