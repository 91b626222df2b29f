//! Error types for the acquisition pipeline

use sensors::DriverError;
use thiserror::Error;

/// Pipeline-specific error types
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("A stream is already running")]
    AlreadyRunning,

    #[error("Failed to spawn thread '{name}': {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
