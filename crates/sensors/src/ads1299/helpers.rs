//! Helper functions for the ADS1299 driver.

use eeg_types::{RawFrame, Sample};
use log::trace;

use crate::types::DriverError;

/// Scale applied to a sign-extended channel count.
///
/// Adjusted from (5 / Gain) / 2^24 with a gain of 24. The datasheet formula
/// uses 4.5 V rather than 5 V; this value was calibrated against the board.
pub const SCALE_FACTOR: f64 = 0.000_000_012_1;

/// Number of status bytes leading every frame.
pub const STATUS_BYTES: usize = 3;

/// Convert 24-bit SPI data to a signed 32-bit integer (sign-extended)
pub fn ch_sample_to_raw(msb: u8, mid: u8, lsb: u8) -> i32 {
    let raw_value = ((msb as u32) << 16) | ((mid as u32) << 8) | (lsb as u32);
    ((raw_value as i32) << 8) >> 8
}

/// Scale a sign-extended count with the calibration constant.
pub fn ch_raw_to_scaled(raw: i32) -> f64 {
    raw as f64 * SCALE_FACTOR
}

/// Helper function to get current timestamp in microseconds
pub fn current_timestamp_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Decodes the sign-extended count of every channel in `frame`.
pub fn frame_to_raw(frame: &RawFrame) -> Result<Vec<i32>, DriverError> {
    let expected = frame.expected_len();
    if frame.len() != expected {
        return Err(DriverError::FrameDecodeError { expected, actual: frame.len() });
    }

    let bytes = frame.as_bytes();
    trace!("Status bytes: [{:02X} {:02X} {:02X}]", bytes[0], bytes[1], bytes[2]);

    Ok(bytes[STATUS_BYTES..]
        .chunks_exact(3)
        .map(|ch| ch_sample_to_raw(ch[0], ch[1], ch[2]))
        .collect())
}

/// Decodes `frame` into a scaled sample stamped with the frame's capture time.
pub fn decode_frame(frame: &RawFrame) -> Result<Sample, DriverError> {
    let values = frame_to_raw(frame)?
        .into_iter()
        .map(ch_raw_to_scaled)
        .collect();
    Ok(Sample {
        values,
        timestamp_us: frame.captured_at_us,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sign_extension() {
        assert_eq!(ch_sample_to_raw(0x00, 0x00, 0x01), 1);
        assert_eq!(ch_sample_to_raw(0xFF, 0xFF, 0xFF), -1);
        assert_eq!(ch_sample_to_raw(0x7F, 0xFF, 0xFF), 8_388_607);
        assert_eq!(ch_sample_to_raw(0x80, 0x00, 0x00), -8_388_608);
        assert_eq!(ch_sample_to_raw(0x12, 0x34, 0x56), 0x123456);
    }

    #[test]
    fn test_msb_selects_sign() {
        for msb in 0u8..=255 {
            let raw = ch_sample_to_raw(msb, 0x10, 0x20);
            if msb < 128 {
                assert!(raw >= 0, "msb {:#04X} decoded negative", msb);
            } else {
                assert!(raw < 0, "msb {:#04X} decoded non-negative", msb);
            }
        }
    }

    #[test]
    fn test_decode_frame_scales_each_channel() {
        let bytes = [0xC0, 0x00, 0x00, 0x00, 0x00, 0x01, 0xFF, 0xFF, 0xFF];
        let frame = RawFrame::from_bytes(&bytes, 2, 1_000).unwrap();
        let sample = decode_frame(&frame).unwrap();
        assert_eq!(sample.values, vec![SCALE_FACTOR, -SCALE_FACTOR]);
        assert_eq!(sample.timestamp_us, 1_000);
    }

    #[test]
    fn test_decode_rejects_short_frame() {
        let frame = RawFrame::from_bytes(&[0xC0, 0x00, 0x00, 0x01, 0x02], 2, 0).unwrap();
        assert_eq!(
            decode_frame(&frame),
            Err(DriverError::FrameDecodeError { expected: 9, actual: 5 })
        );
    }

    proptest! {
        #[test]
        fn prop_every_24_bit_count_decodes_to_itself(count in -(1i32 << 23)..(1i32 << 23)) {
            let bytes = count.to_be_bytes();
            prop_assert_eq!(ch_sample_to_raw(bytes[1], bytes[2], bytes[3]), count);
        }
    }
}
