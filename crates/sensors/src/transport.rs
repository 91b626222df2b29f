//! The bus and pin capabilities the driver needs from its environment.
//!
//! Real hardware adapters live in the `boards` crate; an offline ADS1299
//! model lives in [`crate::mock_eeg`]. The driver only sees these traits.

use std::io;
use std::thread;
use std::time::Duration;

/// Base trait for SPI port operations (object-safe)
pub trait SpiPort: Send + 'static {
    /// Full-duplex transfer: clocks out `write_buffer` while filling
    /// `read_buffer`. Returns the number of bytes transferred.
    fn transfer(&mut self, read_buffer: &mut [u8], write_buffer: &[u8]) -> io::Result<usize>;

    /// Write-only transfer; received bytes are discarded.
    fn write(&mut self, buffer: &[u8]) -> io::Result<usize> {
        let mut discard = vec![0u8; buffer.len()];
        self.transfer(&mut discard, buffer)
    }
}

/// Digital control lines of the ADS1299.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlPin {
    /// START: high lets the chip run conversions.
    Start,
    /// nRESET, active low.
    Reset,
    /// nPWRDN, active low.
    PowerDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Low,
    High,
}

/// Trait for the digital output pins
pub trait ControlPins: Send + 'static {
    fn set(&mut self, pin: ControlPin, level: Level) -> io::Result<()>;
}

/// Callback invoked once per falling edge on DRDY. Runs in the transport's
/// interrupt thread.
pub type DataReadyHandler = Box<dyn FnMut() + Send + 'static>;

/// Trait for the data-ready interrupt line
pub trait DataReadyLine: Send + 'static {
    /// Registers `handler` for falling edges, replacing any previous one.
    fn subscribe(&mut self, handler: DataReadyHandler) -> io::Result<()>;

    /// Removes the handler. Must not return while the handler is running.
    fn unsubscribe(&mut self) -> io::Result<()>;
}

/// Blocking delay used for the chip's timing requirements.
pub trait Delay: Send + 'static {
    fn delay(&mut self, duration: Duration);
}

/// Delay backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

impl Delay for StdDelay {
    fn delay(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Everything needed to talk to one ADS1299.
///
/// The SPI port ends up behind the driver's bus lock. The data-ready line is
/// kept apart from it so that deregistering the handler never waits on the
/// bus while an edge is being served.
pub struct Transport {
    pub spi: Box<dyn SpiPort>,
    pub pins: Box<dyn ControlPins>,
    pub drdy: Box<dyn DataReadyLine>,
    pub delay: Box<dyn Delay>,
}

impl Transport {
    pub fn new(
        spi: impl SpiPort,
        pins: impl ControlPins,
        drdy: impl DataReadyLine,
    ) -> Self {
        Self {
            spi: Box::new(spi),
            pins: Box::new(pins),
            drdy: Box::new(drdy),
            delay: Box::new(StdDelay),
        }
    }

    /// Replaces the delay provider.
    pub fn with_delay(mut self, delay: impl Delay) -> Self {
        self.delay = Box::new(delay);
        self
    }
}
