//! Board-level hardware adapters producing a [`sensors::Transport`].

use serde::{Deserialize, Serialize};
use sensors::{DriverError, Transport};
use thiserror::Error;

#[cfg(feature = "rpi")]
pub mod rpi;

/// Errors raised while acquiring board resources.
#[derive(Error, Debug)]
pub enum BoardError {
    #[error("Invalid hardware configuration: {0}")]
    InvalidConfig(String),
    #[error("GPIO error: {0}")]
    Gpio(String),
    #[error("SPI error: {0}")]
    Spi(String),
    #[error("Board support not compiled in: {0}")]
    Unsupported(&'static str),
}

impl From<BoardError> for DriverError {
    fn from(err: BoardError) -> Self {
        DriverError::TransportUnavailable(err.to_string())
    }
}

/// BCM pin numbers of the ADS1299 control lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    pub start: u8,
    pub reset: u8,
    pub pwdn: u8,
    pub drdy: u8,
    /// Drive chip select from this GPIO instead of the SPI peripheral.
    pub software_cs: Option<u8>,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            start: 22,
            reset: 23,
            pwdn: 24,
            drdy: 25,
            software_cs: None,
        }
    }
}

/// Bus and pin assignment of an ADS1299 board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub spi_bus: u8,
    pub slave_select: u8,
    pub clock_hz: u32,
    /// SPI mode 0-3. The ADS1299 samples on the falling edge, mode 1.
    pub spi_mode: u8,
    pub pins: PinConfig,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            spi_bus: 0,
            slave_select: 0,
            clock_hz: 4_000_000,
            spi_mode: 1,
            pins: PinConfig::default(),
        }
    }
}

impl HardwareConfig {
    pub fn validate(&self) -> Result<(), BoardError> {
        if self.spi_mode > 3 {
            return Err(BoardError::InvalidConfig(format!("SPI mode {} is not 0-3", self.spi_mode)));
        }
        if self.clock_hz == 0 {
            return Err(BoardError::InvalidConfig("SPI clock must be non-zero".to_string()));
        }
        let p = &self.pins;
        let mut pins = vec![p.start, p.reset, p.pwdn, p.drdy];
        pins.extend(p.software_cs);
        let count = pins.len();
        pins.sort_unstable();
        pins.dedup();
        if pins.len() != count {
            return Err(BoardError::InvalidConfig(format!("Duplicate GPIO assignment in {:?}", p)));
        }
        Ok(())
    }
}

/// Opens the SPI bus and GPIO lines described by `config`.
#[cfg(feature = "rpi")]
pub fn open_transport(config: &HardwareConfig) -> Result<Transport, DriverError> {
    config.validate()?;
    Ok(rpi::open(config)?)
}

#[cfg(not(feature = "rpi"))]
pub fn open_transport(config: &HardwareConfig) -> Result<Transport, DriverError> {
    config.validate()?;
    Err(BoardError::Unsupported("built without the `rpi` feature").into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_board_wiring() {
        let config = HardwareConfig::default();
        assert_eq!(config.clock_hz, 4_000_000);
        assert_eq!(config.spi_mode, 1);
        assert_eq!((config.pins.start, config.pins.reset, config.pins.pwdn, config.pins.drdy), (22, 23, 24, 25));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: HardwareConfig =
            serde_json::from_str(r#"{ "clock_hz": 2000000, "pins": { "drdy": 17 } }"#).unwrap();
        assert_eq!(config.clock_hz, 2_000_000);
        assert_eq!(config.pins.drdy, 17);
        assert_eq!(config.pins.start, 22);
        assert_eq!(config.spi_mode, 1);
    }

    #[test]
    fn test_duplicate_pins_rejected() {
        let mut config = HardwareConfig::default();
        config.pins.software_cs = Some(25);
        assert!(matches!(config.validate(), Err(BoardError::InvalidConfig(_))));

        let err: DriverError = BoardError::Gpio("no /dev/gpiomem".into()).into();
        assert!(matches!(err, DriverError::TransportUnavailable(_)));
    }
}
