//! Offline stand-in for an ADS1299 board.
//!
//! [`SimulatedAds1299`] speaks the same register protocol as the chip, so the
//! real driver runs against it unchanged.

pub mod device;
pub mod mock_data_generator;
pub mod transport;

pub use device::{test_signal_counts, DEVICE_ID, FRAME_STATUS};
pub use mock_data_generator::EegGenerator;
pub use transport::{SimulatedAds1299, SimulationMode};
