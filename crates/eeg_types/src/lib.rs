//! Shared types for the ADS1299 acquisition stack
//!
//! This crate contains the data model used throughout the system: device
//! configuration, stream states, raw bus frames and decoded samples.

pub mod config;
pub mod data;

// Re-export commonly used types
pub use config::*;
pub use data::*;
