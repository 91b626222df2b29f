//! Common types for the sensor drivers

use eeg_types::ConfigError;
use thiserror::Error;

/// Status of a sensor driver
#[derive(Debug, Clone, PartialEq)]
pub enum DriverStatus {
    /// Driver is not initialized
    NotInitialized,
    /// Chip is powered up and idle
    Ok,
    /// A stream is active
    Running,
    /// A stream was stopped
    Stopped,
    /// Driver encountered an error
    Error(String),
}

/// Errors that can occur in sensor drivers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    /// The bus or pin capability could not be acquired
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),
    /// Operation not allowed in the current stream or bus mode
    #[error("Invalid state: {0}")]
    InvalidState(String),
    /// Producer could not enqueue; the frame was dropped
    #[error("Queue overflow, frame dropped")]
    QueueOverflow,
    /// A received frame did not have the expected length
    #[error("Frame decode error: expected {expected} bytes, got {actual}")]
    FrameDecodeError { expected: usize, actual: usize },
    /// SPI communication error
    #[error("SPI error: {0}")]
    SpiError(String),
    /// GPIO error
    #[error("GPIO error: {0}")]
    GpioError(String),
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    /// I/O error
    #[error("I/O error: {0}")]
    IoError(String),
    /// Driver not initialized
    #[error("Driver not initialized")]
    NotInitialized,
    /// Generic error
    #[error("Error: {0}")]
    Other(String),
}

impl From<ConfigError> for DriverError {
    fn from(err: ConfigError) -> Self {
        DriverError::ConfigurationError(err.to_string())
    }
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        DriverError::IoError(err.to_string())
    }
}
