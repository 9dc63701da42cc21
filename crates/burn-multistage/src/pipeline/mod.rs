//! Staged sampling pipeline
//!
//! Resolves a stage list once, then walks it strictly in order. Each stage
//! refines the latent produced by the last stage that ran; when that stage
//! used a different model, the latent is bridged into the new model's
//! latent space first.
//!
//! ```text
//! Pending(i) --steps == 0--> Skipped(i) --> Pending(i + 1)
//! Pending(i) --steps >= 1--> Running(i) --bridge?, execute--> Pending(i + 1)
//! Pending(N) --> Done
//! ```

pub mod presets;
pub mod stage;

pub use presets::{MultiStep, StepSwitch};
pub use stage::{PipelineDefaults, Stage, StageSettings, StageSpec, resolve};

use burn::prelude::*;
use burn_multistage_core::{Latent, NoiseSource};
use tracing::{debug, info};

use crate::bridge::{Bridged, bridge};
use crate::control::PipelineControl;
use crate::error::PipelineError;
use crate::executor::{ExecutorOptions, StageExecutor, StageInput};
use crate::model::{DenoisingEngine, same_handle};

/// Shape of the zero latent used when no initial latent is given
pub const DEFAULT_LATENT_SHAPE: [usize; 4] = [1, 4, 64, 64];

// ============================================================================
// State and events
// ============================================================================

/// Position of the orchestrator in the stage list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Pending(usize),
    Running(usize),
    Skipped(usize),
    Done,
}

/// Progress notification passed to [`Orchestrator::run_with_events`]
#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    /// Stage had no steps; the latent passed through untouched
    Skipped { stage: usize },
    /// Latent was re-encoded for the model of stage `to`
    Bridged {
        from: usize,
        to: usize,
        pixel_shape: Vec<usize>,
    },
    Started { stage: usize, steps: usize, seed: u64 },
    Completed { stage: usize, shape: Vec<usize> },
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs stage lists against one denoising engine and noise source
pub struct Orchestrator<'a, B: Backend> {
    executor: StageExecutor<'a, B>,
    device: B::Device,
    control: PipelineControl,
}

impl<'a, B: Backend> Orchestrator<'a, B> {
    /// `device` is used for the default initial latent and for models that
    /// do not report their own device
    pub fn new(
        engine: &'a dyn DenoisingEngine<B>,
        noise: &'a dyn NoiseSource<B>,
        device: &B::Device,
    ) -> Self {
        Self {
            executor: StageExecutor::new(engine, noise, device),
            device: device.clone(),
            control: PipelineControl::default(),
        }
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.executor = self.executor.with_options(options);
        self
    }

    /// Share a cancel flag with the caller
    pub fn with_control(mut self, control: PipelineControl) -> Self {
        self.control = control;
        self
    }

    pub fn control(&self) -> &PipelineControl {
        &self.control
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Resolve `specs` and run them, returning the final latent
    pub fn run(
        &self,
        specs: &[StageSpec<B>],
        defaults: &PipelineDefaults<B>,
        initial: Option<Latent<B>>,
    ) -> Result<Latent<B>, PipelineError> {
        self.run_with_events(specs, defaults, initial, |_| {})
    }

    /// Like [`run`](Self::run), reporting progress through `on_event`
    pub fn run_with_events<F>(
        &self,
        specs: &[StageSpec<B>],
        defaults: &PipelineDefaults<B>,
        initial: Option<Latent<B>>,
        mut on_event: F,
    ) -> Result<Latent<B>, PipelineError>
    where
        F: FnMut(StageEvent),
    {
        let stages = resolve(specs, defaults)?;
        self.run_stages(&stages, initial, &mut on_event)
    }

    /// Run already resolved stages
    ///
    /// Without an `initial` latent the first stage starts from zeros of
    /// [`DEFAULT_LATENT_SHAPE`]; its noise comes from the stage seed alone.
    pub fn run_stages<F>(
        &self,
        stages: &[Stage<B>],
        initial: Option<Latent<B>>,
        on_event: &mut F,
    ) -> Result<Latent<B>, PipelineError>
    where
        F: FnMut(StageEvent),
    {
        if stages.is_empty() {
            return Err(PipelineError::EmptyPipeline);
        }

        let mut latent = match initial {
            Some(latent) => latent,
            None => self.initial_latent(),
        };
        // Last stage that actually ran; its model produced `latent`
        let mut producer: Option<&Stage<B>> = None;
        let mut state = StageState::Pending(0);

        loop {
            state = match state {
                StageState::Pending(i) if i >= stages.len() => StageState::Done,
                StageState::Pending(i) => {
                    if self.control.is_cancelled() {
                        info!(stage = i, "pipeline cancelled");
                        return Err(PipelineError::Cancelled { stage: i });
                    }
                    if stages[i].is_skipped() {
                        StageState::Skipped(i)
                    } else {
                        StageState::Running(i)
                    }
                }
                StageState::Skipped(i) => {
                    info!(stage = i, "skipping stage with no steps");
                    on_event(StageEvent::Skipped { stage: i });
                    StageState::Pending(i + 1)
                }
                StageState::Running(i) => {
                    let stage = &stages[i];
                    if let Some(prev) = producer {
                        latent = self.bridge_between(prev, stage, latent, on_event)?;
                    }
                    latent = self.run_stage(stage, latent, on_event)?;
                    producer = Some(stage);
                    StageState::Pending(i + 1)
                }
                StageState::Done => break,
            };
        }

        Ok(latent)
    }

    fn initial_latent(&self) -> Latent<B> {
        debug!(shape = ?DEFAULT_LATENT_SHAPE, "no initial latent, starting from zeros");
        Latent::new(Tensor::<B, 4>::zeros(DEFAULT_LATENT_SHAPE, &self.device))
    }

    fn run_stage<F>(
        &self,
        stage: &Stage<B>,
        latent: Latent<B>,
        on_event: &mut F,
    ) -> Result<Latent<B>, PipelineError>
    where
        F: FnMut(StageEvent),
    {
        info!(
            stage = stage.index,
            model = stage.model.as_ref().map(|m| m.name()).unwrap_or("none"),
            steps = stage.steps,
            seed = stage.seed,
            sampler = %stage.sampler,
            scheduler = %stage.scheduler,
            cfg = stage.guidance_scale,
            denoise = stage.denoise,
            "running stage"
        );
        on_event(StageEvent::Started {
            stage: stage.index,
            steps: stage.steps,
            seed: stage.seed,
        });

        let output = self
            .executor
            .execute(StageInput {
                model: stage.model.as_deref(),
                latent,
                positive: stage.positive.as_ref(),
                negative: stage.negative.as_ref(),
                steps: stage.steps,
                sampler: stage.sampler,
                scheduler: stage.scheduler,
                guidance_scale: stage.guidance_scale,
                seed: stage.seed,
                denoise: stage.denoise,
            })
            .map_err(PipelineError::at_stage(stage.index))?;

        let shape = output.dims();
        info!(stage = stage.index, ?shape, "stage complete");
        on_event(StageEvent::Completed {
            stage: stage.index,
            shape,
        });
        Ok(output)
    }

    /// Bridge `latent` from `from`'s latent space into `to`'s
    ///
    /// Only when the models are distinct handles and both stages carry a
    /// codec; the codec handles themselves decide whether any work happens.
    fn bridge_between<F>(
        &self,
        from: &Stage<B>,
        to: &Stage<B>,
        latent: Latent<B>,
        on_event: &mut F,
    ) -> Result<Latent<B>, PipelineError>
    where
        F: FnMut(StageEvent),
    {
        let (Some(from_model), Some(to_model)) = (&from.model, &to.model) else {
            return Ok(latent);
        };
        if same_handle(from_model, to_model) {
            return Ok(latent);
        }
        if from.vae.is_none() || to.vae.is_none() {
            debug!(
                from = from.index,
                to = to.index,
                "model changed without codecs on both sides, passing latent through"
            );
            return Ok(latent);
        }

        let samples = latent
            .samples
            .into_bchw()
            .map_err(PipelineError::at_stage(to.index))?;
        match bridge(samples, from.vae.as_ref(), to.vae.as_ref())
            .map_err(PipelineError::at_stage(to.index))?
        {
            Bridged::Skipped(samples) => Ok(Latent::new(samples)),
            Bridged::Converted {
                latent,
                pixel_shape,
            } => {
                info!(
                    from = from.index,
                    to = to.index,
                    ?pixel_shape,
                    shape = ?latent.dims(),
                    "bridged latent between models"
                );
                on_event(StageEvent::Bridged {
                    from: from.index,
                    to: to.index,
                    pixel_shape,
                });
                Ok(Latent::new(latent))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DenoiseRequest, DiffusionModel, ModelRef};
    use burn_multistage_core::{ChannelHints, EngineError, SeededNoise};
    use burn_ndarray::{NdArray, NdArrayDevice};
    use std::sync::Arc;

    type TestBackend = NdArray<f32>;

    struct Model;
    impl ChannelHints for Model {}
    impl DiffusionModel<TestBackend> for Model {}

    /// Adds one per step so stage order is visible in the output
    struct CountSteps;

    impl DenoisingEngine<TestBackend> for CountSteps {
        fn denoise(
            &self,
            request: DenoiseRequest<'_, TestBackend>,
        ) -> Result<Tensor<TestBackend, 4>, EngineError> {
            Ok(request.latent.add_scalar(request.steps as f32))
        }
    }

    fn first_value(latent: Latent<TestBackend>) -> f32 {
        latent.samples.into_bchw().unwrap().into_data().to_vec::<f32>().unwrap()[0]
    }

    #[test]
    fn test_state_walk_and_events() {
        let device = NdArrayDevice::default();
        let orchestrator = Orchestrator::<TestBackend>::new(&CountSteps, &SeededNoise, &device);
        let model: ModelRef<TestBackend> = Arc::new(Model);
        let specs = vec![
            StageSpec::new(3).with_model(model),
            StageSpec::new(0),
            StageSpec::new(2),
        ];
        let mut events = Vec::new();
        let initial = Latent::new(Tensor::<TestBackend, 4>::zeros([1, 4, 8, 8], &device));
        let out = orchestrator
            .run_with_events(&specs, &PipelineDefaults::default(), Some(initial), |e| {
                events.push(e)
            })
            .unwrap();

        assert_eq!(first_value(out), 5.0);
        assert_eq!(
            events,
            vec![
                StageEvent::Started {
                    stage: 0,
                    steps: 3,
                    seed: 0
                },
                StageEvent::Completed {
                    stage: 0,
                    shape: vec![1, 4, 8, 8]
                },
                StageEvent::Skipped { stage: 1 },
                StageEvent::Started {
                    stage: 2,
                    steps: 2,
                    seed: 2
                },
                StageEvent::Completed {
                    stage: 2,
                    shape: vec![1, 4, 8, 8]
                },
            ]
        );
    }

    #[test]
    fn test_default_initial_latent() {
        let device = NdArrayDevice::default();
        let orchestrator = Orchestrator::<TestBackend>::new(&CountSteps, &SeededNoise, &device);
        let specs = vec![StageSpec::<TestBackend>::new(0)];
        let out = orchestrator
            .run(&specs, &PipelineDefaults::default().with_seed(9), None)
            .unwrap();
        assert_eq!(out.dims(), DEFAULT_LATENT_SHAPE.to_vec());
        let values = out.samples.into_bchw().unwrap().into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_cancelled_before_first_stage() {
        let device = NdArrayDevice::default();
        let control = PipelineControl::new();
        control.cancel();
        let orchestrator =
            Orchestrator::<TestBackend>::new(&CountSteps, &SeededNoise, &device).with_control(control);
        let model: ModelRef<TestBackend> = Arc::new(Model);
        let specs = vec![StageSpec::new(1).with_model(model)];
        let err = orchestrator
            .run(&specs, &PipelineDefaults::default(), None)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { stage: 0 }));
    }

    #[test]
    fn test_run_stages_rejects_empty() {
        let device = NdArrayDevice::default();
        let orchestrator = Orchestrator::<TestBackend>::new(&CountSteps, &SeededNoise, &device);
        let err = orchestrator.run_stages(&[], None, &mut |_| {}).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyPipeline));
    }
}
