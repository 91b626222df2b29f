pub mod types;
pub mod transport;
pub mod spi_bus;
pub mod ads1299;
pub mod mock_eeg;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export the main types that users need
pub use types::{DriverError, DriverStatus};
pub use transport::{ControlPin, DataReadyHandler, DataReadyLine, Delay, Level, SpiPort, ControlPins, StdDelay, Transport};
pub use ads1299::acquisition::{AcquisitionStats, FrameSink, StatsSnapshot};
pub use ads1299::driver::Ads1299Driver;
pub use mock_eeg::{SimulatedAds1299, SimulationMode};
