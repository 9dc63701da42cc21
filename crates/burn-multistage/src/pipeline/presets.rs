//! Two- and three-stage pipeline layouts
//!
//! Both presets only build stage lists for the general orchestrator.

use burn::prelude::*;

use super::stage::{StageSettings, StageSpec};

/// Hand over from one stage configuration to another at a fixed step
///
/// Stage 1 runs `switch_point` steps, stage 2 runs whatever remains of
/// `total_steps`. Either stage is skipped when its share is not positive.
#[derive(Clone)]
pub struct StepSwitch<B: Backend> {
    pub total_steps: i64,
    pub switch_point: i64,
    pub before: StageSettings<B>,
    pub after: StageSettings<B>,
}

impl<B: Backend> Default for StepSwitch<B> {
    fn default() -> Self {
        Self {
            total_steps: 20,
            switch_point: 10,
            before: StageSettings::default(),
            after: StageSettings::default(),
        }
    }
}

impl<B: Backend> StepSwitch<B> {
    pub fn new(total_steps: i64, switch_point: i64) -> Self {
        Self {
            total_steps,
            switch_point,
            ..Default::default()
        }
    }

    pub fn with_before(mut self, settings: StageSettings<B>) -> Self {
        self.before = settings;
        self
    }

    pub fn with_after(mut self, settings: StageSettings<B>) -> Self {
        self.after = settings;
        self
    }

    /// Steps for the stage after the switch
    pub fn steps_after(&self) -> i64 {
        self.total_steps.saturating_sub(self.switch_point).max(0)
    }

    pub fn stages(&self) -> Vec<StageSpec<B>> {
        vec![
            StageSpec::from_settings(self.switch_point, self.before.clone()),
            StageSpec::from_settings(self.steps_after(), self.after.clone()),
        ]
    }
}

/// Three consecutive stages, 10 steps each by default
#[derive(Clone)]
pub struct MultiStep<B: Backend> {
    pub stages: [StageSpec<B>; 3],
}

impl<B: Backend> Default for MultiStep<B> {
    fn default() -> Self {
        Self {
            stages: std::array::from_fn(|_| StageSpec::new(10)),
        }
    }
}

impl<B: Backend> MultiStep<B> {
    pub fn new(stages: [StageSpec<B>; 3]) -> Self {
        Self { stages }
    }

    /// Set the settings of stage `index` (0..3), keeping its step count
    pub fn with_stage(mut self, index: usize, settings: StageSettings<B>) -> Self {
        if let Some(stage) = self.stages.get_mut(index) {
            stage.settings = settings;
        }
        self
    }

    pub fn with_steps(mut self, steps: [i64; 3]) -> Self {
        for (stage, steps) in self.stages.iter_mut().zip(steps) {
            stage.steps = steps;
        }
        self
    }

    pub fn stages(&self) -> Vec<StageSpec<B>> {
        self.stages.to_vec()
    }
}
