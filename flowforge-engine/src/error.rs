//! Engine error taxonomy
//!
//! Every failure surfaced by an engine entry point falls into one of these
//! kinds. Validation and NotFound reject a request before any run record is
//! created; the remaining kinds are produced while a run executes and are
//! absorbed by the per-run driver, which performs the single terminal-state
//! write. No error ever escapes a run's task.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the pipeline engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad spec, unparseable cron, unknown step type
    #[error("validation failed: {0}")]
    Validation(String),

    /// Pipeline, run, or credential absent
    #[error("not found: {0}")]
    NotFound(String),

    /// Network or filesystem failure while executing a step
    #[error("i/o failure: {0}")]
    Transient(String),

    /// Script ran to completion but reported failure
    #[error("script exited with code {0}")]
    NonZeroExit(i32),

    /// Step wall-clock exceeded
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Operator-initiated cancellation
    #[error("cancelled")]
    Cancelled,

    /// Persistence gateway failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Engine invariant violation; logged and converted to a failed run
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this error reports an operator cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error is rejected before a run record exists
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound(_))
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(format!("{:#}", err))
    }
}
