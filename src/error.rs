//! Error types for the frame pipeline.
//!
//! Only configuration mistakes and lifecycle misuse are errors. Timing races
//! at shutdown (enqueue after stop, double start/stop) resolve as silent
//! no-ops and never show up here, and cancellation is a normal outcome of
//! `abort()`.
//!
//! - **`InvalidArgument`**: a construction parameter is out of range (e.g. a
//!   zero timer frequency).
//! - **`Config`**: wraps `figment` errors from loading TOML/env settings.
//! - **`Validation`**: settings that parse but are logically wrong.
//! - **`Pool`**: frame pool construction errors.
//! - **`ModulesLocked`**: the module chain was changed while running.
//! - **`Disposed`**: the pipeline was used after `dispose()`.
//! - **`Spawn`**: the OS refused to start the worker or tick thread.

use frame_pool::PoolError;
use thiserror::Error;

/// Convenience alias for results using the pipeline error type.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Frame pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Module chain cannot change while the pipeline is running")]
    ModulesLocked,

    #[error("Pipeline has been disposed")]
    Disposed,

    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::InvalidArgument("frequency must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid argument: frequency must be positive"
        );
    }

    #[test]
    fn test_pool_error_converts() {
        let err: PipelineError = PoolError::InvalidSize(0).into();
        assert!(matches!(err, PipelineError::Pool(PoolError::InvalidSize(0))));
        assert!(err.to_string().contains("invalid pool size 0"));
    }

    #[test]
    fn test_spawn_error_names_thread() {
        let err = PipelineError::Spawn {
            name: "pipeline-worker".into(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "no threads"),
        };
        assert!(err.to_string().contains("pipeline-worker"));
    }
}
