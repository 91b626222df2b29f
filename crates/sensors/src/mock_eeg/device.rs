//! Register-level model of an ADS1299 behind an SPI port.

use eeg_types::MAX_CHANNELS;
use log::{debug, trace};

use super::mock_data_generator::{EegGenerator, COUNT_MAX, COUNT_MIN};
use crate::ads1299::registers::{
    chnset_gain, config1_rate_hz, CAL_AMP, CAL_FREQ_MASK, CH1SET_ADDR, CH_POWER_DOWN, CMD_RDATAC,
    CMD_RESET, CMD_SDATAC, CMD_START, CMD_STOP, CONFIG1_ADDR, CONFIG2_ADDR, CONFIG3_ADDR, INT_CAL,
    MUX_INPUT_SHORTED, MUX_MASK, MUX_NORMAL, MUX_TEST_SIGNAL, REGISTER_COUNT, REG_ADDR_MASK, REG_ID_ADDR,
    RREG_OPCODE, WREG_OPCODE,
};
use crate::transport::{ControlPin, Level};

/// Device ID reported by an ADS1299 with eight channels.
pub const DEVICE_ID: u8 = 0x3E;

/// Status bytes leading every simulated frame: sync nibble, no lead-off.
pub const FRAME_STATUS: [u8; 3] = [0xC0, 0x00, 0x00];

/// Reference voltage the counts are computed against.
const VREF: f64 = 4.5;

/// Noise on a shorted input, in counts.
const SHORTED_NOISE_COUNTS: f64 = 2.0;

const OPCODE_MASK: u8 = 0xE0;

fn power_on_registers() -> [u8; REGISTER_COUNT] {
    let mut registers = [0u8; REGISTER_COUNT];
    registers[REG_ID_ADDR as usize] = DEVICE_ID;
    registers[CONFIG1_ADDR as usize] = 0x96;
    registers[CONFIG2_ADDR as usize] = 0xC0;
    registers[CONFIG3_ADDR as usize] = 0x60;
    for ch in 0..MAX_CHANNELS {
        registers[(CH1SET_ADDR + ch) as usize] = 0x61;
    }
    registers
}

/// Test signal amplitude in counts for a channel gain.
///
/// The internal test signal is +-(VREFP - VREFN) / 2400, doubled when
/// CAL_AMP is set.
pub fn test_signal_counts(gain: u8, double_amplitude: bool) -> i32 {
    let volts = VREF / 2400.0 * if double_amplitude { 2.0 } else { 1.0 };
    let counts = volts * gain as f64 * (1u32 << 23) as f64 / VREF;
    counts.round().clamp(COUNT_MIN as f64, COUNT_MAX as f64) as i32
}

pub(crate) struct DeviceModel {
    registers: [u8; REGISTER_COUNT],
    continuous_read: bool,
    start_pin: bool,
    start_command: bool,
    reset_low: bool,
    powered: bool,
    generator: EegGenerator,
    samples_produced: u64,
}

impl DeviceModel {
    pub(crate) fn new(seed: u64) -> Self {
        let registers = power_on_registers();
        Self {
            generator: EegGenerator::new(config1_rate_hz(registers[CONFIG1_ADDR as usize]), MAX_CHANNELS as usize, seed),
            registers,
            continuous_read: true,
            start_pin: false,
            start_command: false,
            reset_low: false,
            powered: false,
            samples_produced: 0,
        }
    }

    pub(crate) fn register(&self, addr: u8) -> u8 {
        self.registers.get(addr as usize).copied().unwrap_or(0)
    }

    pub(crate) fn is_continuous_read(&self) -> bool {
        self.continuous_read
    }

    /// True while the chip is converting and raising DRDY.
    pub(crate) fn is_converting(&self) -> bool {
        self.powered && !self.reset_low && (self.start_pin || self.start_command)
    }

    pub(crate) fn sample_rate_hz(&self) -> u32 {
        config1_rate_hz(self.registers[CONFIG1_ADDR as usize])
    }

    pub(crate) fn samples_produced(&self) -> u64 {
        self.samples_produced
    }

    fn reset(&mut self) {
        debug!("Simulated ADS1299 reset");
        self.registers = power_on_registers();
        self.continuous_read = true;
        self.start_command = false;
        self.generator.set_sample_rate(self.sample_rate_hz());
    }

    pub(crate) fn set_pin(&mut self, pin: ControlPin, level: Level) {
        let high = level == Level::High;
        match pin {
            ControlPin::Start => self.start_pin = high,
            ControlPin::PowerDown => self.powered = high,
            ControlPin::Reset => {
                if high && self.reset_low {
                    self.reset();
                }
                self.reset_low = !high;
            }
        }
    }

    /// Serves one SPI transaction.
    pub(crate) fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> usize {
        let len = read.len().min(write.len());
        read[..len].fill(0);
        let Some(&first) = write.first() else {
            return 0;
        };

        if write.len() == 1 {
            self.command(first);
        } else if first & OPCODE_MASK == RREG_OPCODE {
            self.read_registers(first & REG_ADDR_MASK, write, &mut read[..len]);
        } else if first & OPCODE_MASK == WREG_OPCODE {
            self.write_registers(first & REG_ADDR_MASK, write);
        } else if first == 0x00 {
            self.fill_frame(&mut read[..len]);
        } else {
            trace!("Simulated ADS1299 ignored transfer {:02X?}", write);
        }
        len
    }

    fn command(&mut self, opcode: u8) {
        trace!("Simulated ADS1299 command 0x{:02X}", opcode);
        match opcode {
            CMD_RDATAC => self.continuous_read = true,
            CMD_SDATAC => self.continuous_read = false,
            CMD_START => self.start_command = true,
            CMD_STOP => self.start_command = false,
            CMD_RESET => self.reset(),
            _ => {}
        }
    }

    fn read_registers(&self, start: u8, write: &[u8], read: &mut [u8]) {
        // in continuous-read mode the chip ignores register commands
        if self.continuous_read || write.len() < 2 {
            return;
        }
        let count = write[1] as usize + 1;
        for (i, slot) in read.iter_mut().skip(2).take(count).enumerate() {
            *slot = self.registers.get(start as usize + i).copied().unwrap_or(0);
        }
    }

    fn write_registers(&mut self, start: u8, write: &[u8]) {
        if self.continuous_read || write.len() < 3 {
            return;
        }
        let count = write[1] as usize + 1;
        for (i, &value) in write[2..].iter().take(count).enumerate() {
            let addr = start as usize + i;
            if addr == REG_ID_ADDR as usize || addr >= REGISTER_COUNT {
                continue;
            }
            self.registers[addr] = value;
        }
        if (start as usize..start as usize + count).contains(&(CONFIG1_ADDR as usize)) {
            self.generator.set_sample_rate(self.sample_rate_hz());
        }
    }

    fn fill_frame(&mut self, read: &mut [u8]) {
        if read.len() < FRAME_STATUS.len() {
            return;
        }
        read[..3].copy_from_slice(&FRAME_STATUS);
        let index = self.samples_produced;
        for (ch, bytes) in read[3..].chunks_exact_mut(3).enumerate() {
            let count = self.channel_count_value(ch, index);
            let raw = (count as u32) & 0x00FF_FFFF;
            bytes.copy_from_slice(&[(raw >> 16) as u8, (raw >> 8) as u8, raw as u8]);
        }
        self.samples_produced += 1;
    }

    fn channel_count_value(&mut self, ch: usize, index: u64) -> i32 {
        let Some(&chnset) = self.registers.get(CH1SET_ADDR as usize + ch) else {
            return 0;
        };
        if !self.powered || chnset & CH_POWER_DOWN != 0 || ch >= MAX_CHANNELS as usize {
            return 0;
        }
        match chnset & MUX_MASK {
            MUX_NORMAL => self.generator.generate_sample(ch),
            MUX_INPUT_SHORTED => self.generator.shorted_noise(SHORTED_NOISE_COUNTS),
            MUX_TEST_SIGNAL => self.test_signal(chnset, index),
            _ => 0,
        }
    }

    fn test_signal(&self, chnset: u8, index: u64) -> i32 {
        let config2 = self.registers[CONFIG2_ADDR as usize];
        if config2 & INT_CAL == 0 {
            // test source driven externally, nothing connected
            return 0;
        }
        let amplitude = test_signal_counts(chnset_gain(chnset), config2 & CAL_AMP != 0);
        let frequency_hz = match config2 & CAL_FREQ_MASK {
            0b00 => 1,
            0b01 => 2,
            // DC
            _ => return amplitude,
        };
        let half_period = (self.sample_rate_hz() / (2 * frequency_hz)).max(1) as u64;
        if (index / half_period) % 2 == 0 {
            amplitude
        } else {
            -amplitude
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ads1299::helpers::ch_sample_to_raw;

    fn powered_model() -> DeviceModel {
        let mut model = DeviceModel::new(3);
        model.set_pin(ControlPin::PowerDown, Level::High);
        model.set_pin(ControlPin::Reset, Level::High);
        model
    }

    fn xfer(model: &mut DeviceModel, write: &[u8]) -> Vec<u8> {
        let mut read = vec![0u8; write.len()];
        model.transfer(&mut read, write);
        read
    }

    #[test]
    fn test_register_access_needs_sdatac() {
        let mut model = powered_model();
        assert_eq!(xfer(&mut model, &[0x20, 0x00, 0x00])[2], 0);
        xfer(&mut model, &[CMD_SDATAC]);
        assert_eq!(xfer(&mut model, &[0x20, 0x00, 0x00])[2], DEVICE_ID);

        xfer(&mut model, &[0x42, 0x00, 0xD0]);
        assert_eq!(model.register(CONFIG2_ADDR), 0xD0);
        // ID is read-only
        xfer(&mut model, &[0x40, 0x00, 0x00]);
        assert_eq!(model.register(REG_ID_ADDR), DEVICE_ID);
    }

    #[test]
    fn test_multi_register_write() {
        let mut model = powered_model();
        xfer(&mut model, &[CMD_SDATAC]);
        xfer(&mut model, &[0x45, 0x02, 0x60, 0x61, 0x62]);
        assert_eq!(model.register(0x05), 0x60);
        assert_eq!(model.register(0x06), 0x61);
        assert_eq!(model.register(0x07), 0x62);
        assert_eq!(model.register(0x08), 0x61);
    }

    #[test]
    fn test_reset_pulse_restores_defaults() {
        let mut model = powered_model();
        xfer(&mut model, &[CMD_SDATAC]);
        xfer(&mut model, &[0x41, 0x00, 0x93]);
        model.set_pin(ControlPin::Reset, Level::Low);
        model.set_pin(ControlPin::Reset, Level::High);
        assert_eq!(model.register(CONFIG1_ADDR), 0x96);
        assert!(model.is_continuous_read());
    }

    #[test]
    fn test_test_signal_frame() {
        let mut model = powered_model();
        xfer(&mut model, &[CMD_SDATAC]);
        xfer(&mut model, &[0x42, 0x00, 0xD0]);
        xfer(&mut model, &[0x45, 0x00, 0x65]);
        xfer(&mut model, &[CMD_RDATAC]);

        let frame = xfer(&mut model, &[0u8; 6]);
        assert_eq!(&frame[..3], &FRAME_STATUS);
        assert_eq!(ch_sample_to_raw(frame[3], frame[4], frame[5]), test_signal_counts(24, false));
        assert_eq!(test_signal_counts(24, false), 83_886);
    }

    #[test]
    fn test_square_wave_period() {
        let mut model = powered_model();
        xfer(&mut model, &[CMD_SDATAC]);
        xfer(&mut model, &[0x41, 0x00, 0x96]);
        xfer(&mut model, &[0x42, 0x00, 0xD0]);
        xfer(&mut model, &[0x45, 0x00, 0x65]);

        let values: Vec<i32> = (0..250)
            .map(|_| {
                let f = xfer(&mut model, &[0u8; 6]);
                ch_sample_to_raw(f[3], f[4], f[5])
            })
            .collect();
        // 1 Hz at 250 SPS: 125 high, 125 low
        assert!(values[..125].iter().all(|&v| v == 83_886));
        assert!(values[125..].iter().all(|&v| v == -83_886));
    }

    #[test]
    fn test_powered_down_channel_reads_zero() {
        let mut model = powered_model();
        xfer(&mut model, &[CMD_SDATAC]);
        xfer(&mut model, &[0x45, 0x00, 0xE0]);
        let frame = xfer(&mut model, &[0u8; 6]);
        assert_eq!(&frame[3..], &[0, 0, 0]);
    }

    #[test]
    fn test_converting_follows_start() {
        let mut model = powered_model();
        assert!(!model.is_converting());
        model.set_pin(ControlPin::Start, Level::High);
        assert!(model.is_converting());
        model.set_pin(ControlPin::PowerDown, Level::Low);
        assert!(!model.is_converting());
    }
}
