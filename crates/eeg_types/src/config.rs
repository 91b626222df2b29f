//! Device configuration types for the ADS1299

use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of channels on a single ADS1299.
pub const MAX_CHANNELS: u8 = 8;

/// Errors raised while validating a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid channel count: {0}. ADS1299 supports 1-8 channels")]
    InvalidChannelCount(u8),
}

/// Output data rates supported by the acquisition stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum SampleRate {
    Sps250,
    Sps500,
    Sps1000,
    Sps2000,
}

impl SampleRate {
    /// Maps a rate in Hz onto a supported rate.
    ///
    /// Anything that is not 500, 1000 or 2000 Hz selects 250 Hz, which is the
    /// same fallback the CONFIG1 encoding uses.
    pub fn from_hz(hz: u32) -> Self {
        match hz {
            2000 => SampleRate::Sps2000,
            1000 => SampleRate::Sps1000,
            500 => SampleRate::Sps500,
            250 => SampleRate::Sps250,
            other => {
                warn!("Unsupported sample rate {} Hz, falling back to 250 Hz", other);
                SampleRate::Sps250
            }
        }
    }

    pub fn hz(self) -> u32 {
        match self {
            SampleRate::Sps250 => 250,
            SampleRate::Sps500 => 500,
            SampleRate::Sps1000 => 1000,
            SampleRate::Sps2000 => 2000,
        }
    }
}

impl From<u32> for SampleRate {
    fn from(hz: u32) -> Self {
        SampleRate::from_hz(hz)
    }
}

impl From<SampleRate> for u32 {
    fn from(rate: SampleRate) -> Self {
        rate.hz()
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} SPS", self.hz())
    }
}

/// Configuration of the acquisition chip.
///
/// Only mutable while no stream is active; the driver enforces this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Number of active channels, starting at channel 0.
    #[serde(default = "default_channel_count")]
    pub channel_count: u8,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: SampleRate,
    /// Drive the bias electrode from every active channel.
    #[serde(default)]
    pub bias_enabled: bool,
}

fn default_channel_count() -> u8 { MAX_CHANNELS }
fn default_sample_rate() -> SampleRate { SampleRate::Sps500 }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            channel_count: default_channel_count(),
            sample_rate: default_sample_rate(),
            bias_enabled: false,
        }
    }
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_channel_count(self.channel_count)
    }

    /// Number of bytes in one data frame: 3 status bytes plus 3 per channel.
    pub fn frame_len(&self) -> usize {
        frame_len(self.channel_count)
    }

    /// Applies the fields present in `update`, keeping the others.
    ///
    /// The update is validated as a whole before anything is written, so a
    /// rejected update leaves the configuration untouched.
    pub fn apply(&mut self, update: &ConfigUpdate) -> Result<(), ConfigError> {
        if let Some(count) = update.channel_count {
            validate_channel_count(count)?;
            self.channel_count = count;
        }
        if let Some(rate) = update.sample_rate {
            self.sample_rate = rate;
        }
        if let Some(bias) = update.bias_enabled {
            self.bias_enabled = bias;
        }
        Ok(())
    }
}

fn validate_channel_count(count: u8) -> Result<(), ConfigError> {
    if count == 0 || count > MAX_CHANNELS {
        return Err(ConfigError::InvalidChannelCount(count));
    }
    Ok(())
}

/// Frame length for `channel_count` channels.
pub fn frame_len(channel_count: u8) -> usize {
    3 + 3 * channel_count as usize
}

/// A partial configuration change. Omitted fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    #[serde(default)]
    pub channel_count: Option<u8>,
    #[serde(default)]
    pub sample_rate: Option<SampleRate>,
    #[serde(default)]
    pub bias_enabled: Option<bool>,
}

impl ConfigUpdate {
    pub fn channel_count(mut self, count: u8) -> Self {
        self.channel_count = Some(count);
        self
    }

    pub fn sample_rate(mut self, rate: SampleRate) -> Self {
        self.sample_rate = Some(rate);
        self
    }

    pub fn bias_enabled(mut self, enabled: bool) -> Self {
        self.bias_enabled = Some(enabled);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.channel_count.is_none() && self.sample_rate.is_none() && self.bias_enabled.is_none()
    }
}

/// Which data stream the chip is producing.
///
/// The two configuring states only exist while a start sequence is being
/// written to the chip; frames arriving then are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StreamState {
    Idle = 0,
    ConfiguringEeg = 1,
    EegStreaming = 2,
    ConfiguringTest = 3,
    TestStreaming = 4,
}

impl StreamState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => StreamState::ConfiguringEeg,
            2 => StreamState::EegStreaming,
            3 => StreamState::ConfiguringTest,
            4 => StreamState::TestStreaming,
            _ => StreamState::Idle,
        }
    }

    /// True while samples are being forwarded to consumers.
    pub fn is_active(self) -> bool {
        matches!(self, StreamState::EegStreaming | StreamState::TestStreaming)
    }
}

/// The two kinds of stream the chip can be started in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    Eeg,
    Test,
}

impl StreamMode {
    pub fn configuring_state(self) -> StreamState {
        match self {
            StreamMode::Eeg => StreamState::ConfiguringEeg,
            StreamMode::Test => StreamState::ConfiguringTest,
        }
    }

    pub fn streaming_state(self) -> StreamState {
        match self {
            StreamMode::Eeg => StreamState::EegStreaming,
            StreamMode::Test => StreamState::TestStreaming,
        }
    }
}
