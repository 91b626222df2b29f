//! Raspberry Pi transport over rppal.

use std::io;

use log::{debug, info};
use rppal::gpio::{Gpio, InputPin, OutputPin, Trigger};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use sensors::{ControlPin, ControlPins, DataReadyHandler, DataReadyLine, Level, SpiPort, Transport};

use crate::{BoardError, HardwareConfig};

fn io_error(e: impl std::fmt::Display) -> io::Error {
    io::Error::other(e.to_string())
}

/// Opens SPI and GPIO for one ADS1299.
pub fn open(config: &HardwareConfig) -> Result<Transport, BoardError> {
    let bus = match config.spi_bus {
        0 => Bus::Spi0,
        1 => Bus::Spi1,
        other => return Err(BoardError::InvalidConfig(format!("Invalid SPI bus {}", other))),
    };
    let slave_select = match config.slave_select {
        0 => SlaveSelect::Ss0,
        1 => SlaveSelect::Ss1,
        2 => SlaveSelect::Ss2,
        other => return Err(BoardError::InvalidConfig(format!("Invalid slave select {}", other))),
    };
    let mode = match config.spi_mode {
        0 => Mode::Mode0,
        1 => Mode::Mode1,
        2 => Mode::Mode2,
        _ => Mode::Mode3,
    };

    let spi = Spi::new(bus, slave_select, config.clock_hz, mode).map_err(|e| BoardError::Spi(e.to_string()))?;
    info!(
        "SPI {:?}/{:?} opened at {} Hz, {:?}",
        bus, slave_select, config.clock_hz, mode
    );

    let gpio = Gpio::new().map_err(|e| BoardError::Gpio(e.to_string()))?;
    let output = |pin: u8| -> Result<OutputPin, BoardError> {
        let mut pin = gpio
            .get(pin)
            .map_err(|e| BoardError::Gpio(format!("GPIO {}: {}", pin, e)))?
            .into_output();
        pin.set_low();
        Ok(pin)
    };

    let chip_select = match config.pins.software_cs {
        Some(cs) => {
            let mut pin = output(cs)?;
            pin.set_high();
            info!("CS pin {} initialized for software control", cs);
            Some(pin)
        }
        None => None,
    };

    let pins = RpiPins {
        start: output(config.pins.start)?,
        reset: output(config.pins.reset)?,
        pwdn: output(config.pins.pwdn)?,
    };

    let drdy = gpio
        .get(config.pins.drdy)
        .map_err(|e| BoardError::Gpio(format!("GPIO {}: {}", config.pins.drdy, e)))?
        .into_input_pullup();
    debug!(
        "DRDY pin {} initial state: {}",
        config.pins.drdy,
        if drdy.is_high() { "HIGH" } else { "LOW" }
    );

    Ok(Transport::new(RpiSpi { spi, chip_select }, pins, RpiDataReady { pin: drdy }))
}

struct RpiSpi {
    spi: Spi,
    chip_select: Option<OutputPin>,
}

impl SpiPort for RpiSpi {
    fn transfer(&mut self, read_buffer: &mut [u8], write_buffer: &[u8]) -> io::Result<usize> {
        if let Some(cs) = self.chip_select.as_mut() {
            cs.set_low();
        }
        let result = self.spi.transfer(read_buffer, write_buffer).map_err(io_error);
        if let Some(cs) = self.chip_select.as_mut() {
            cs.set_high();
        }
        result
    }
}

struct RpiPins {
    start: OutputPin,
    reset: OutputPin,
    pwdn: OutputPin,
}

impl ControlPins for RpiPins {
    fn set(&mut self, pin: ControlPin, level: Level) -> io::Result<()> {
        let output = match pin {
            ControlPin::Start => &mut self.start,
            ControlPin::Reset => &mut self.reset,
            ControlPin::PowerDown => &mut self.pwdn,
        };
        match level {
            Level::High => output.set_high(),
            Level::Low => output.set_low(),
        }
        Ok(())
    }
}

struct RpiDataReady {
    pin: InputPin,
}

impl DataReadyLine for RpiDataReady {
    fn subscribe(&mut self, mut handler: DataReadyHandler) -> io::Result<()> {
        self.pin
            .set_async_interrupt(Trigger::FallingEdge, None, move |_event| handler())
            .map_err(io_error)?;
        info!("Asynchronous DRDY interrupt handler registered on pin {}", self.pin.pin());
        Ok(())
    }

    // rppal joins its interrupt thread here, so no handler is running once
    // this returns.
    fn unsubscribe(&mut self) -> io::Result<()> {
        self.pin.clear_async_interrupt().map_err(io_error)?;
        debug!("DRDY interrupt handler cleared on pin {}", self.pin.pin());
        Ok(())
    }
}
