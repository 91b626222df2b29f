//! Acquisition pipeline for the ADS1299
//!
//! This crate sits between the driver and its consumers: it broadcasts decoded
//! samples to registered clients on a dispatch thread, and runs unattended
//! captures that queue raw frames and persist them in binary chunks.

pub mod capture;
pub mod clients;
pub mod dispatch;
pub mod eeg_system;
pub mod error;
pub mod queue;

// Re-export commonly used types
pub use capture::{CaptureConfig, CaptureReport, CaptureSession, StopReason};
pub use clients::{ClientId, ClientRegistry, SampleClient};
pub use dispatch::{DispatchSink, DispatchWorker, DEFAULT_DISPATCH_CAPACITY};
pub use eeg_system::{EegSystem, SystemStats};
pub use error::{PipelineError, PipelineResult};
pub use queue::{QueueConsumer, QueueProducer, QueueStats, SampleQueue};
