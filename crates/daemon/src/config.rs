//! Daemon configuration file.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use boards::HardwareConfig;
use eeg_types::DeviceConfig;
use pipeline::CaptureConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "./config.json";

/// Everything the daemon reads from `config.json`. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub device: DeviceConfig,
    pub hardware: HardwareConfig,
    pub capture: CaptureConfig,
    /// Use the simulated chip when the board cannot be opened.
    pub fallback_to_simulated: bool,
}

impl DaemonConfig {
    pub fn validate(&self) -> Result<()> {
        self.device.validate().context("invalid device section")?;
        self.hardware.validate().context("invalid hardware section")?;
        self.capture.validate().context("invalid capture section")?;
        Ok(())
    }
}

/// Loads the configuration at `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<DaemonConfig> {
    let config = match fs::read_to_string(path) {
        Ok(contents) => {
            let config: DaemonConfig = serde_json::from_str(&contents)
                .with_context(|| format!("could not parse configuration file '{}'", path.display()))?;
            info!("Loaded configuration from {}", path.display());
            config
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("Configuration file '{}' not found, using defaults", path.display());
            DaemonConfig::default()
        }
        Err(e) => {
            return Err(e).with_context(|| format!("could not read configuration file '{}'", path.display()));
        }
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eeg_types::{SampleRate, StreamMode};

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert!(!config.fallback_to_simulated);
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "device": { "channel_count": 4, "sample_rate": 250, "bias_enabled": true },
                "hardware": { "clock_hz": 2000000, "pins": { "drdy": 17 } },
                "capture": { "mode": "eeg", "drain_threshold": 100 },
                "fallback_to_simulated": true
            }"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.device.channel_count, 4);
        assert_eq!(config.device.sample_rate, SampleRate::Sps250);
        assert!(config.device.bias_enabled);
        assert_eq!(config.hardware.clock_hz, 2_000_000);
        assert_eq!(config.hardware.pins.drdy, 17);
        assert_eq!(config.hardware.pins.start, 22);
        assert_eq!(config.capture.mode, StreamMode::Eeg);
        assert_eq!(config.capture.drain_threshold, 100);
        assert_eq!(config.capture.queue_capacity, 20_000);
        assert!(config.fallback_to_simulated);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "device": { "channel_count": 9 } }"#).unwrap();
        assert!(load_config(&path).is_err());

        fs::write(&path, "not json").unwrap();
        assert!(load_config(&path).is_err());
    }
}
