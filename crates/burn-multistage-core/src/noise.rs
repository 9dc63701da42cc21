//! Seed-keyed noise generation
//!
//! Noise is a pure function of `(shape, seed, batch_index)`. It is generated
//! on the host from a seeded RNG instead of the backend's global generator so
//! that the same arguments give bit-identical noise on every backend and no
//! global RNG state is touched.

use std::collections::HashMap;

use burn::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::error::StageError;

/// Largest accepted `batch_index` entry
///
/// Every item up to the largest index is drawn before selecting, so the
/// index bounds the work done per call.
pub const MAX_BATCH_INDEX: usize = 4096;

/// Produces the initial noise for a stage
pub trait NoiseSource<B: Backend> {
    /// Noise with the given latent shape, placed on `device`
    fn provision(
        &self,
        shape: [usize; 4],
        seed: u64,
        device: &B::Device,
        batch_index: Option<&[usize]>,
    ) -> Result<Tensor<B, 4>, StageError>;
}

/// Standard-normal noise from a `StdRng` seeded with the stage seed
#[derive(Debug, Clone, Copy, Default)]
pub struct SeededNoise;

impl<B: Backend> NoiseSource<B> for SeededNoise {
    fn provision(
        &self,
        shape: [usize; 4],
        seed: u64,
        device: &B::Device,
        batch_index: Option<&[usize]>,
    ) -> Result<Tensor<B, 4>, StageError> {
        seeded_noise(shape, seed, device, batch_index)
    }
}

/// Generate standard-normal noise of `shape` keyed to `seed`
///
/// Samples are drawn batch item by batch item from a single stream. With a
/// `batch_index`, items `0..=max(batch_index)` are drawn in order and the
/// listed ones are returned, so a latent that is one slice of a larger batch
/// gets the same noise it would have had inside that batch. Indices above
/// [`MAX_BATCH_INDEX`] are rejected.
pub fn seeded_noise<B: Backend, const D: usize>(
    shape: [usize; D],
    seed: u64,
    device: &B::Device,
    batch_index: Option<&[usize]>,
) -> Result<Tensor<B, D>, StageError> {
    if D == 0 || shape.iter().any(|&d| d == 0) {
        return Err(StageError::invalid_latent(format!(
            "cannot provision noise for empty shape {:?}",
            shape
        )));
    }

    let batch = shape[0];
    let per_sample: usize = shape[1..].iter().product();
    let mut rng = StdRng::seed_from_u64(seed);

    let values = match batch_index {
        None => {
            let mut values = Vec::with_capacity(batch * per_sample);
            for _ in 0..batch {
                values.extend((0..per_sample).map(|_| rng.sample::<f32, _>(StandardNormal)));
            }
            values
        }
        Some(indices) => {
            if indices.len() != batch {
                return Err(StageError::invalid_latent(format!(
                    "batch_index has {} entries but latent batch is {}",
                    indices.len(),
                    batch
                )));
            }
            let last = indices.iter().copied().max().unwrap_or(0);
            if last > MAX_BATCH_INDEX {
                return Err(StageError::invalid_latent(format!(
                    "batch_index {} exceeds the limit of {}",
                    last, MAX_BATCH_INDEX
                )));
            }
            let mut drawn: HashMap<usize, Vec<f32>> = HashMap::new();
            for i in 0..=last {
                let sample: Vec<f32> = (0..per_sample)
                    .map(|_| rng.sample::<f32, _>(StandardNormal))
                    .collect();
                if indices.contains(&i) {
                    drawn.insert(i, sample);
                }
            }
            let mut values = Vec::with_capacity(batch * per_sample);
            for i in indices {
                if let Some(sample) = drawn.get(i) {
                    values.extend_from_slice(sample);
                }
            }
            values
        }
    };

    Ok(Tensor::from_data(TensorData::new(values, shape), device))
}
