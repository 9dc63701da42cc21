//! Pipeline-level errors

use std::path::PathBuf;

use burn_multistage_core::StageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("pipeline has no stages")]
    EmptyPipeline,

    #[error("stage {stage}: no model provided and none to inherit from an earlier stage")]
    MissingModel { stage: usize },

    #[error("stage {stage}: {reason}")]
    InvalidStage { stage: usize, reason: String },

    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: usize,
        #[source]
        source: StageError,
    },

    #[error("pipeline cancelled before stage {stage}")]
    Cancelled { stage: usize },

    #[error("unknown {kind} '{name}'")]
    UnknownHandle { kind: &'static str, name: String },

    #[error("invalid pipeline config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("failed to read pipeline config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub(crate) fn at_stage(stage: usize) -> impl FnOnce(StageError) -> Self {
        move |source| match source {
            StageError::MissingModel => PipelineError::MissingModel { stage },
            source => PipelineError::Stage { stage, source },
        }
    }

    /// Underlying stage failure, if this error came from running a stage
    pub fn stage_error(&self) -> Option<&StageError> {
        match self {
            PipelineError::Stage { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Index of the stage the error is attributed to
    pub fn stage(&self) -> Option<usize> {
        match self {
            PipelineError::MissingModel { stage }
            | PipelineError::InvalidStage { stage, .. }
            | PipelineError::Stage { stage, .. }
            | PipelineError::Cancelled { stage } => Some(*stage),
            _ => None,
        }
    }
}
