//! Cooperative cancellation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancel flag for a running pipeline
///
/// Checked only before a stage starts. A stage already inside the denoising
/// engine or a codec call runs to completion and its output is kept; the
/// pipeline stops at the next stage boundary. A cancel raised during the
/// last stage therefore still returns that stage's latent.
#[derive(Debug, Clone, Default)]
pub struct PipelineControl {
    cancelled: Arc<AtomicBool>,
}

impl PipelineControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag so the control can be reused
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}
