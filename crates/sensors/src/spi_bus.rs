//! A thread-safe SPI bus accessor that serializes every transaction.

use log::warn;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::transport::SpiPort;
use crate::DriverError;

/// A thread-safe wrapper around an SPI port.
///
/// Every transfer holds the lock for its full duration, so transactions from
/// the interrupt thread and from the configuring thread never interleave.
#[derive(Clone)]
pub struct SpiBus {
    port: Arc<Mutex<Box<dyn SpiPort>>>,
}

impl SpiBus {
    pub fn new(port: Box<dyn SpiPort>) -> Self {
        Self {
            port: Arc::new(Mutex::new(port)),
        }
    }

    // A panic during an earlier transaction poisons the mutex. The port itself
    // is still usable, so take the guard back instead of wedging the bus.
    fn lock(&self) -> MutexGuard<'_, Box<dyn SpiPort>> {
        self.port.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            warn!("SPI bus lock was poisoned by a panicked transaction, recovering");
            poisoned.into_inner()
        })
    }

    /// Performs a full-duplex transfer on the bus.
    pub fn transfer(&self, read_buffer: &mut [u8], write_buffer: &[u8]) -> Result<usize, DriverError> {
        let mut port = self.lock();
        port.transfer(read_buffer, write_buffer)
            .map_err(|e| DriverError::SpiError(e.to_string()))
    }

    /// Performs a write-only transfer on the bus.
    pub fn write(&self, buffer: &[u8]) -> Result<(), DriverError> {
        let mut port = self.lock();
        port.write(buffer)
            .map(|_| ()) // Discard the usize on success
            .map_err(|e| DriverError::SpiError(e.to_string()))
    }
}
