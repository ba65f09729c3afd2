use atelier_core::error::CoreError;
use atelier_generation::GenerationError;

/// Errors surfaced while firing a node.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// A matting task on the blocking pool panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl RuntimeError {
    /// Whether this error is a rejected re-trigger of a node already running.
    pub fn is_already_in_progress(&self) -> bool {
        matches!(self, Self::Core(CoreError::AlreadyInProgress(_)))
    }
}
