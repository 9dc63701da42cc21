//! Single-stage execution
//!
//! Takes one resolved stage's inputs, brings the latent into the model's
//! expected layout and device, provisions noise and calls the denoising
//! engine. The caller is responsible for skipping stages with no steps.

use burn::prelude::*;
use burn_multistage_core::{
    DebugConfig, Latent, NoiseSource, StageError, ensure_channels, ensure_finite,
    expected_channels, reconcile_channels, tensor_stats,
};
use tracing::debug;

use crate::model::{Conditioning, DenoiseRequest, DenoisingEngine, DiffusionModel};
use crate::sampler::{SamplerType, ScheduleType};

/// Executor behavior switches
#[derive(Debug, Clone, Copy)]
pub struct ExecutorOptions {
    /// Pad or truncate latent channels to the model's width before sampling
    pub reconcile_channels: bool,
    /// Debug output flags
    pub debug: DebugConfig,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            reconcile_channels: true,
            debug: DebugConfig::default(),
        }
    }
}

/// Inputs of one denoising stage
pub struct StageInput<'a, B: Backend> {
    pub model: Option<&'a dyn DiffusionModel<B>>,
    pub latent: Latent<B>,
    pub positive: Option<&'a Conditioning<B>>,
    pub negative: Option<&'a Conditioning<B>>,
    /// Sampling steps, at least 1
    pub steps: usize,
    pub sampler: SamplerType,
    pub scheduler: ScheduleType,
    pub guidance_scale: f64,
    pub seed: u64,
    pub denoise: f64,
}

/// Runs one stage against the denoising engine
pub struct StageExecutor<'a, B: Backend> {
    engine: &'a dyn DenoisingEngine<B>,
    noise: &'a dyn NoiseSource<B>,
    /// Used when a model does not report its own device
    device: B::Device,
    options: ExecutorOptions,
}

impl<'a, B: Backend> StageExecutor<'a, B> {
    pub fn new(
        engine: &'a dyn DenoisingEngine<B>,
        noise: &'a dyn NoiseSource<B>,
        device: &B::Device,
    ) -> Self {
        Self {
            engine,
            noise,
            device: device.clone(),
            options: ExecutorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Device a stage for `model` runs on
    pub fn resolve_device(&self, model: &dyn DiffusionModel<B>) -> B::Device {
        model.device().unwrap_or_else(|| self.device.clone())
    }

    /// Run one stage and return its output latent
    ///
    /// The output carries only samples; batch index and noise mask of the
    /// input are consumed by this stage.
    pub fn execute(&self, input: StageInput<'_, B>) -> Result<Latent<B>, StageError> {
        let model = input.model.ok_or(StageError::MissingModel)?;
        debug_assert!(input.steps >= 1, "stages without steps must be skipped");

        let Latent {
            samples,
            batch_index,
            noise_mask,
        } = input.latent;

        let device = self.resolve_device(model);
        let expected = expected_channels(model);

        let latent = samples.into_bchw()?;
        let latent = match expected {
            Some(channels) if self.options.reconcile_channels => {
                reconcile_channels(latent, channels)
            }
            _ => latent,
        };
        ensure_channels(&latent, expected)?;

        let latent = latent.to_device(&device);
        let noise = self
            .noise
            .provision(latent.dims(), input.seed, &device, batch_index.as_deref())?;
        let noise_mask = noise_mask.map(|mask| mask.to_device(&device));

        debug!(
            model = model.name(),
            shape = ?latent.dims(),
            seed = input.seed,
            steps = input.steps,
            sampler = %input.sampler,
            scheduler = %input.scheduler,
            "invoking denoising engine"
        );
        if self.options.debug.stats {
            debug!(stats = %tensor_stats(&latent), "stage input latent");
        }

        let output = self.engine.denoise(DenoiseRequest {
            model,
            noise,
            positive: input.positive,
            negative: input.negative,
            guidance_scale: input.guidance_scale,
            sampler: input.sampler,
            scheduler: input.scheduler,
            latent,
            denoise: input.denoise,
            seed: input.seed,
            steps: input.steps,
            noise_mask,
            device: &device,
        })?;

        if self.options.debug.stats {
            debug!(stats = %tensor_stats(&output), "stage output latent");
        }
        if self.options.debug.nan {
            ensure_finite(&output, "stage output")?;
        }

        Ok(Latent::new(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_multistage_core::{ChannelHints, EngineError, SeededNoise};
    use burn_ndarray::{NdArray, NdArrayDevice};
    use std::sync::Mutex;

    type TestBackend = NdArray<f32>;

    struct Model {
        channels: Option<i64>,
    }

    impl ChannelHints for Model {
        fn latent_channels(&self) -> Option<i64> {
            self.channels
        }
    }

    impl DiffusionModel<TestBackend> for Model {}

    /// Returns `latent + noise`, remembering what it was asked
    #[derive(Default)]
    struct AddNoise {
        seen: Mutex<Vec<(Vec<usize>, u64, usize)>>,
    }

    impl DenoisingEngine<TestBackend> for AddNoise {
        fn denoise(
            &self,
            request: DenoiseRequest<'_, TestBackend>,
        ) -> Result<Tensor<TestBackend, 4>, EngineError> {
            self.seen.lock().unwrap().push((
                request.latent.dims().to_vec(),
                request.seed,
                request.steps,
            ));
            Ok(request.latent + request.noise)
        }
    }

    struct Failing;

    impl DenoisingEngine<TestBackend> for Failing {
        fn denoise(
            &self,
            _request: DenoiseRequest<'_, TestBackend>,
        ) -> Result<Tensor<TestBackend, 4>, EngineError> {
            Err(EngineError::new("device lost"))
        }
    }

    fn input<'a>(
        model: Option<&'a dyn DiffusionModel<TestBackend>>,
        latent: Latent<TestBackend>,
    ) -> StageInput<'a, TestBackend> {
        StageInput {
            model,
            latent,
            positive: None,
            negative: None,
            steps: 20,
            sampler: SamplerType::Euler,
            scheduler: ScheduleType::Normal,
            guidance_scale: 7.5,
            seed: 3,
            denoise: 1.0,
        }
    }

    #[test]
    fn test_executor_options_default() {
        let options = ExecutorOptions::default();
        assert!(options.reconcile_channels);
        assert!(!options.debug.nan);
    }

    #[test]
    fn test_missing_model() {
        let device = NdArrayDevice::default();
        let engine = AddNoise::default();
        let executor = StageExecutor::<TestBackend>::new(&engine, &SeededNoise, &device);
        let latent = Latent::new(Tensor::<TestBackend, 4>::zeros([1, 4, 8, 8], &device));
        let err = executor.execute(input(None, latent)).unwrap_err();
        assert!(matches!(err, StageError::MissingModel));
        assert!(engine.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_output_shape_matches_input() {
        let device = NdArrayDevice::default();
        let engine = AddNoise::default();
        let executor = StageExecutor::<TestBackend>::new(&engine, &SeededNoise, &device);
        let model = Model { channels: Some(4) };
        let latent = Latent::new(Tensor::<TestBackend, 4>::zeros([1, 4, 8, 8], &device));
        let out = executor.execute(input(Some(&model), latent)).unwrap();
        assert_eq!(out.dims(), vec![1, 4, 8, 8]);
        assert_eq!(engine.seen.lock().unwrap()[0], (vec![1, 4, 8, 8], 3, 20));
    }

    #[test]
    fn test_channels_reconciled_before_sampling() {
        let device = NdArrayDevice::default();
        let engine = AddNoise::default();
        let executor = StageExecutor::<TestBackend>::new(&engine, &SeededNoise, &device);
        let model = Model { channels: Some(16) };
        let latent = Latent::new(Tensor::<TestBackend, 3>::zeros([4, 8, 8], &device));
        let out = executor.execute(input(Some(&model), latent)).unwrap();
        assert_eq!(out.dims(), vec![1, 16, 8, 8]);
    }

    #[test]
    fn test_unreconciled_mismatch_is_fatal() {
        let device = NdArrayDevice::default();
        let engine = AddNoise::default();
        let executor = StageExecutor::<TestBackend>::new(&engine, &SeededNoise, &device).with_options(
            ExecutorOptions {
                reconcile_channels: false,
                ..Default::default()
            },
        );
        let model = Model { channels: Some(16) };
        let latent = Latent::new(Tensor::<TestBackend, 4>::zeros([1, 4, 8, 8], &device));
        let err = executor.execute(input(Some(&model), latent)).unwrap_err();
        assert!(matches!(
            err,
            StageError::ChannelMismatch {
                expected: 16,
                actual: 4,
                ..
            }
        ));
        assert!(engine.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_width_passes_through() {
        let device = NdArrayDevice::default();
        let engine = AddNoise::default();
        let executor = StageExecutor::<TestBackend>::new(&engine, &SeededNoise, &device);
        let model = Model { channels: None };
        let latent = Latent::new(Tensor::<TestBackend, 4>::zeros([2, 12, 4, 4], &device));
        let out = executor.execute(input(Some(&model), latent)).unwrap();
        assert_eq!(out.dims(), vec![2, 12, 4, 4]);
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let device = NdArrayDevice::default();
        let engine = AddNoise::default();
        let executor = StageExecutor::<TestBackend>::new(&engine, &SeededNoise, &device);
        let model = Model { channels: Some(4) };
        let run = || {
            let latent = Latent::new(Tensor::<TestBackend, 4>::ones([1, 4, 8, 8], &device));
            executor
                .execute(input(Some(&model), latent))
                .unwrap()
                .samples
                .into_bchw()
                .unwrap()
                .into_data()
                .to_vec::<f32>()
                .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_engine_failure_propagates() {
        let device = NdArrayDevice::default();
        let executor = StageExecutor::<TestBackend>::new(&Failing, &SeededNoise, &device);
        let model = Model { channels: Some(4) };
        let latent = Latent::new(Tensor::<TestBackend, 4>::zeros([1, 4, 8, 8], &device));
        let err = executor.execute(input(Some(&model), latent)).unwrap_err();
        assert!(matches!(err, StageError::Engine(_)));
    }
}
