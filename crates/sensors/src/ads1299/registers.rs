//! Register definitions and value constants for the ADS1299 chip.

use eeg_types::SampleRate;

// Register Addresses
pub const REG_ID_ADDR    : u8 = 0x00;
pub const CONFIG1_ADDR   : u8 = 0x01;
pub const CONFIG2_ADDR   : u8 = 0x02;
pub const CONFIG3_ADDR   : u8 = 0x03;
pub const CH1SET_ADDR    : u8 = 0x05;
pub const BIAS_SENSP_ADDR: u8 = 0x0D;
pub const BIAS_SENSN_ADDR: u8 = 0x0E;
pub const MISC1_ADDR     : u8 = 0x15;
pub const CONFIG4_ADDR   : u8 = 0x17;

/// Number of addressable registers (0x00..=0x17).
pub const REGISTER_COUNT: usize = CONFIG4_ADDR as usize + 1;

// ADS1299 Commands
pub const CMD_WAKEUP: u8 = 0x02;
pub const CMD_STANDBY: u8 = 0x04;
pub const CMD_RESET: u8 = 0x06;
pub const CMD_START: u8 = 0x08;
pub const CMD_STOP: u8 = 0x0A;
pub const CMD_RDATAC: u8 = 0x10;
pub const CMD_SDATAC: u8 = 0x11;
pub const CMD_RDATA: u8 = 0x12;

// Opcode prefixes, OR'd with the register address
pub const RREG_OPCODE: u8 = 0x20;
pub const WREG_OPCODE: u8 = 0x40;
pub const REG_ADDR_MASK: u8 = 0x1F;

// CONFIG1: reserved bits 0x90, low bits select the data rate
pub const CONFIG1_BASE: u8 = 0x90;
pub const DR_MASK: u8 = 0x07;

// CONFIG2
pub const CONFIG2_DEFAULT: u8 = 0xC0;     // test signal driven externally
pub const INT_CAL: u8 = 1 << 4;           // 1 : test signal generated internally
pub const CAL_AMP: u8 = 1 << 2;           // 1 : test amplitude 2 x -(VREFP - VREFN) / 2400
pub const CAL_FREQ_MASK: u8 = 0x03;
pub const CONFIG2_TEST_SIGNAL: u8 = CONFIG2_DEFAULT | INT_CAL; // 0xD0, pulsed at fCLK / 2^21

// CONFIG3
pub const PD_REFBUF: u8 = 1 << 7;         // 1 : Enable internal reference buffer
pub const BIASREF_INT: u8 = 1 << 3;       // 1 : BIASREF signal (AVDD + AVSS) / 2 generated internally
pub const PD_BIAS: u8 = 1 << 2;           // 1 : BIAS buffer is enabled
pub const CONFIG3_DEFAULT: u8 = 0xE0;     // internal reference, bias off
pub const CONFIG3_BIAS_ENABLED: u8 = CONFIG3_DEFAULT | BIASREF_INT | PD_BIAS; // 0xEC

// CHnSET
pub const CH_POWER_DOWN: u8 = 1 << 7;
pub const GAIN_MASK: u8 = 0x70;
pub const MUX_MASK: u8 = 0x07;
pub const MUX_NORMAL: u8 = 0;             // Normal electrode input
pub const MUX_INPUT_SHORTED: u8 = 1;
pub const MUX_TEST_SIGNAL: u8 = 5;
pub const GAIN_24: u8 = 6 << 4;
pub const CH_SHORTED: u8 = MUX_INPUT_SHORTED;            // 0x01
pub const CH_EEG: u8 = GAIN_24 | MUX_NORMAL;             // 0x60
pub const CH_TEST_SIGNAL: u8 = GAIN_24 | MUX_TEST_SIGNAL; // 0x65

// MISC1
pub const SRB1: u8 = 1 << 5;              // 1 : SRB1 connected to all inverting inputs

// BIAS_SENSP / BIAS_SENSN
pub const BIAS_SENS_OFF_MASK: u8 = 0x00;

/// Data rate code for CONFIG1.
pub fn sps_to_reg_mask(rate: SampleRate) -> u8 {
    match rate {
        SampleRate::Sps2000 => 0x03,
        SampleRate::Sps1000 => 0x04,
        SampleRate::Sps500 => 0x05,
        SampleRate::Sps250 => 0x06,
    }
}

/// Full CONFIG1 value for `rate`.
pub fn config1_value(rate: SampleRate) -> u8 {
    CONFIG1_BASE | sps_to_reg_mask(rate)
}

/// Output data rate in Hz selected by the low bits of CONFIG1.
pub fn config1_rate_hz(config1: u8) -> u32 {
    16_000 >> (config1 & DR_MASK).min(6)
}

/// Bias sense mask with one bit per active channel, starting at channel 0.
pub fn bias_channel_mask(channel_count: u8) -> u8 {
    (0..channel_count.min(8)).fold(0u8, |mask, ch| mask | (1 << ch))
}

/// Gain multiplier encoded in a CHnSET value.
pub fn chnset_gain(chnset: u8) -> u8 {
    match (chnset & GAIN_MASK) >> 4 {
        0 => 1,
        1 => 2,
        2 => 4,
        3 => 6,
        4 => 8,
        5 => 12,
        _ => 24,
    }
}
