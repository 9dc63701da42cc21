//! Stage-level error taxonomy

use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure reported by a codec (VAE) during encode
#[derive(Error, Debug)]
#[error("{message}")]
pub struct CodecError {
    message: String,
    #[source]
    source: Option<BoxedSource>,
}

impl CodecError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error with context
    pub fn with_source(message: impl Into<String>, source: impl Into<BoxedSource>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Failure reported by the denoising engine
#[derive(Error, Debug)]
#[error("{message}")]
pub struct EngineError {
    message: String,
    #[source]
    source: Option<BoxedSource>,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error with context
    pub fn with_source(message: impl Into<String>, source: impl Into<BoxedSource>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Errors raised while preparing, bridging or sampling a single stage
///
/// Every variant is fatal for the pipeline invocation that raised it.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("no model provided to stage")]
    MissingModel,

    #[error("invalid latent: {0}")]
    InvalidLatent(String),

    #[error("channel mismatch: model expects {expected} channels, latent has {actual} (shape {shape:?})")]
    ChannelMismatch {
        expected: usize,
        actual: usize,
        shape: Vec<usize>,
    },

    #[error("bridge decode failed for latent of shape {latent_shape:?}: {reason}")]
    BridgeDecode {
        latent_shape: Vec<usize>,
        reason: String,
    },

    #[error("bridge encode failed for pixel tensor of shape {pixel_shape:?}: {source}")]
    BridgeEncode {
        pixel_shape: Vec<usize>,
        #[source]
        source: CodecError,
    },

    #[error("denoising engine failed: {0}")]
    Engine(#[from] EngineError),

    #[error("non-finite values in {name}: {stats}")]
    NonFinite { name: String, stats: String },
}

impl StageError {
    pub(crate) fn invalid_latent(reason: impl Into<String>) -> Self {
        StageError::InvalidLatent(reason.into())
    }
}
