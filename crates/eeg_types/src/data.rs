use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{frame_len, MAX_CHANNELS};

/// Size of the largest possible data frame (8 channels).
pub const MAX_FRAME_LEN: usize = 3 + 3 * MAX_CHANNELS as usize;

/// One raw data frame as clocked out of the chip on a data-ready edge.
///
/// The bytes are stored inline so that producing a frame in interrupt
/// context never allocates.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RawFrame {
    bytes: [u8; MAX_FRAME_LEN],
    len: u8,
    channel_count: u8,
    /// Capture time in microseconds since the UNIX epoch.
    pub captured_at_us: u64,
}

impl RawFrame {
    /// Creates a zeroed frame sized for `channel_count` channels.
    pub fn new(channel_count: u8, captured_at_us: u64) -> Self {
        let channel_count = channel_count.min(MAX_CHANNELS);
        Self {
            bytes: [0u8; MAX_FRAME_LEN],
            len: frame_len(channel_count) as u8,
            channel_count,
            captured_at_us,
        }
    }

    /// Copies `bytes` into a frame. Returns `None` if they do not fit.
    pub fn from_bytes(bytes: &[u8], channel_count: u8, captured_at_us: u64) -> Option<Self> {
        if bytes.len() > MAX_FRAME_LEN || channel_count > MAX_CHANNELS {
            return None;
        }
        let mut frame = Self::new(channel_count, captured_at_us);
        frame.bytes[..bytes.len()].copy_from_slice(bytes);
        frame.len = bytes.len() as u8;
        Some(frame)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Mutable view over the bytes currently in the frame.
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.bytes[..self.len as usize]
    }

    /// Shortens the frame, e.g. after a short bus transfer.
    pub fn truncate(&mut self, len: usize) {
        if len < self.len as usize {
            self.len = len as u8;
        }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn channel_count(&self) -> u8 {
        self.channel_count
    }

    /// Length this frame should have for its channel count.
    pub fn expected_len(&self) -> usize {
        frame_len(self.channel_count)
    }

    /// The three status bytes, if present.
    pub fn status(&self) -> Option<[u8; 3]> {
        let bytes = self.as_bytes();
        if bytes.len() < 3 {
            return None;
        }
        Some([bytes[0], bytes[1], bytes[2]])
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("channel_count", &self.channel_count)
            .field("captured_at_us", &self.captured_at_us)
            .field("bytes", &format_args!("{:02X?}", self.as_bytes()))
            .finish()
    }
}

/// One decoded sampling instant across all active channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Scaled channel readings, channel 0 first.
    pub values: Vec<f64>,
    /// Capture time in microseconds since the UNIX epoch.
    pub timestamp_us: u64,
}

impl Sample {
    pub fn channel_count(&self) -> usize {
        self.values.len()
    }
}
