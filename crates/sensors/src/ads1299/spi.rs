//! Register-level command protocol of the ADS1299.
//!
//! Every transaction is a single transfer on the shared [`SpiBus`], so it holds
//! the bus lock from the first byte to the last.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eeg_types::{frame_len, RawFrame, MAX_FRAME_LEN};
use log::{debug, trace};

use super::helpers::current_timestamp_micros;
use super::registers::{CMD_RDATAC, CMD_SDATAC, REG_ADDR_MASK, RREG_OPCODE, WREG_OPCODE};
use crate::spi_bus::SpiBus;
use crate::types::DriverError;

/// Command interface to one ADS1299 on a shared bus.
///
/// Cloning is cheap; clones share the bus and the continuous-read flag.
#[derive(Clone)]
pub struct Ads1299Spi {
    bus: SpiBus,
    continuous_read: Arc<AtomicBool>,
}

impl Ads1299Spi {
    pub fn new(bus: SpiBus) -> Self {
        Self {
            bus,
            continuous_read: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True after RDATAC until the next SDATAC.
    pub fn is_continuous_read(&self) -> bool {
        self.continuous_read.load(Ordering::Acquire)
    }

    /// Overrides the tracked mode after events the engine does not see, such
    /// as a hardware reset.
    pub(crate) fn assume_continuous_read(&self, active: bool) {
        self.continuous_read.store(active, Ordering::Release);
    }

    /// Send a single-byte command.
    pub fn send_command(&self, opcode: u8) -> Result<(), DriverError> {
        debug!("Sending command 0x{:02X}", opcode);
        self.bus.write(&[opcode])?;
        match opcode {
            CMD_RDATAC => self.continuous_read.store(true, Ordering::Release),
            CMD_SDATAC => self.continuous_read.store(false, Ordering::Release),
            _ => {}
        }
        Ok(())
    }

    /// Read one register. Fails while the chip is in continuous-read mode.
    pub fn read_register(&self, addr: u8) -> Result<u8, DriverError> {
        if self.is_continuous_read() {
            return Err(DriverError::InvalidState(format!(
                "Cannot read register 0x{:02X} in continuous-read mode, send SDATAC first",
                addr
            )));
        }
        let write_buffer = [RREG_OPCODE | (addr & REG_ADDR_MASK), 0x00, 0x00];
        let mut read_buffer = [0u8; 3];
        self.bus.transfer(&mut read_buffer, &write_buffer)?;
        trace!("RREG 0x{:02X} -> 0x{:02X}", addr, read_buffer[2]);
        Ok(read_buffer[2])
    }

    /// Write one register.
    pub fn write_register(&self, addr: u8, value: u8) -> Result<(), DriverError> {
        trace!("WREG 0x{:02X} <- 0x{:02X}", addr, value);
        self.bus.write(&[WREG_OPCODE | (addr & REG_ADDR_MASK), 0x00, value])
    }

    /// Write `values` to consecutive registers starting at `start_addr`.
    pub fn write_registers(&self, start_addr: u8, values: &[u8]) -> Result<(), DriverError> {
        let message = write_registers_message(start_addr, values)?;
        trace!("WREG 0x{:02X} <- {:02X?}", start_addr, values);
        self.bus.write(&message)
    }

    /// Clock one data frame out of the chip.
    ///
    /// A short transfer yields a shortened frame; validation is left to the
    /// decoder.
    pub fn read_frame(&self, channel_count: u8) -> Result<RawFrame, DriverError> {
        const ZEROS: [u8; MAX_FRAME_LEN] = [0u8; MAX_FRAME_LEN];
        let mut frame = RawFrame::new(channel_count, 0);
        let len = frame.len();
        let transferred = self.bus.transfer(frame.as_mut_bytes(), &ZEROS[..len])?;
        frame.captured_at_us = current_timestamp_micros();
        frame.truncate(transferred);
        debug_assert!(len == frame_len(frame.channel_count()));
        Ok(frame)
    }
}

/// Builds `[start | WREG, n - 1, v0, v1, ...]`.
pub fn write_registers_message(start_addr: u8, values: &[u8]) -> Result<Vec<u8>, DriverError> {
    if values.is_empty() {
        return Err(DriverError::ConfigurationError(
            "Register write needs at least one value".to_string(),
        ));
    }
    if start_addr as usize + values.len() > super::registers::REGISTER_COUNT {
        return Err(DriverError::ConfigurationError(format!(
            "Writing {} registers from 0x{:02X} runs past the register map",
            values.len(),
            start_addr
        )));
    }
    let mut message = Vec::with_capacity(values.len() + 2);
    message.push(WREG_OPCODE | (start_addr & REG_ADDR_MASK));
    message.push((values.len() - 1) as u8);
    message.extend_from_slice(values);
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{BusEvent, RecordingBus};

    #[test]
    fn test_multi_register_header() {
        let values = [0x60u8, 0x61, 0x62, 0x63, 0x64, 0x65, 0x66, 0x67];
        let message = write_registers_message(0x05, &values).unwrap();
        assert_eq!(&message[..2], &[0x45, 0x07]);
        assert_eq!(&message[2..], &values);
    }

    #[test]
    fn test_empty_register_write_rejected() {
        assert!(matches!(
            write_registers_message(0x05, &[]),
            Err(DriverError::ConfigurationError(_))
        ));
        assert!(write_registers_message(0x15, &[0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_opcodes_on_the_wire() {
        let recorder = RecordingBus::new();
        let spi = Ads1299Spi::new(SpiBus::new(Box::new(recorder.port())));

        spi.write_register(0x03, 0xE0).unwrap();
        spi.send_command(CMD_SDATAC).unwrap();
        recorder.respond_with(vec![0x00, 0x00, 0x3E]);
        assert_eq!(spi.read_register(0x00).unwrap(), 0x3E);

        assert_eq!(
            recorder.transfers(),
            vec![vec![0x43, 0x00, 0xE0], vec![0x11], vec![0x20, 0x00, 0x00]]
        );
    }

    #[test]
    fn test_register_read_rejected_in_continuous_mode() {
        let recorder = RecordingBus::new();
        let spi = Ads1299Spi::new(SpiBus::new(Box::new(recorder.port())));

        spi.send_command(CMD_RDATAC).unwrap();
        assert!(spi.is_continuous_read());
        assert!(matches!(spi.read_register(0x01), Err(DriverError::InvalidState(_))));
        // nothing but the RDATAC went out
        assert_eq!(recorder.events(), vec![BusEvent::Transfer(vec![0x10])]);

        spi.send_command(CMD_SDATAC).unwrap();
        assert!(spi.read_register(0x01).is_ok());
    }

    #[test]
    fn test_frame_read_length() {
        let recorder = RecordingBus::new();
        let spi = Ads1299Spi::new(SpiBus::new(Box::new(recorder.port())));

        let frame = spi.read_frame(4).unwrap();
        assert_eq!(frame.len(), 15);
        assert_eq!(recorder.transfers(), vec![vec![0u8; 15]]);
    }
}
