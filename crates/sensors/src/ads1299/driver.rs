//! Main driver implementation for the ADS1299 chip.

use std::sync::Arc;
use std::time::Duration;

use eeg_types::{ConfigUpdate, DeviceConfig, StreamMode, StreamState, MAX_CHANNELS};
use log::{debug, error, info, warn};

use super::acquisition::{data_ready_handler, AcquisitionStats, FrameSink, StatsSnapshot, StreamShared};
use super::registers::{
    bias_channel_mask, config1_value, BIAS_SENSN_ADDR, BIAS_SENSP_ADDR, BIAS_SENS_OFF_MASK,
    CH1SET_ADDR, CH_EEG, CH_SHORTED, CH_TEST_SIGNAL, CMD_RDATAC, CMD_SDATAC, CONFIG1_ADDR,
    CONFIG2_ADDR, CONFIG2_DEFAULT, CONFIG2_TEST_SIGNAL, CONFIG3_ADDR, CONFIG3_BIAS_ENABLED,
    CONFIG3_DEFAULT, MISC1_ADDR, REGISTER_COUNT, SRB1,
};
use super::spi::Ads1299Spi;
use crate::spi_bus::SpiBus;
use crate::transport::{ControlPin, ControlPins, DataReadyLine, Delay, Level, Transport};
use crate::types::{DriverError, DriverStatus};

const POWER_ON_SETTLE: Duration = Duration::from_millis(1000);
const RESET_PULSE: Duration = Duration::from_millis(200);
const COMMAND_SETTLE: Duration = Duration::from_millis(1);

const REGISTER_NAMES: [&str; REGISTER_COUNT] = [
    "ID", "CONFIG1", "CONFIG2", "CONFIG3", "LOFF", "CH1SET", "CH2SET", "CH3SET", "CH4SET",
    "CH5SET", "CH6SET", "CH7SET", "CH8SET", "BIAS_SENSP", "BIAS_SENSN", "LOFF_SENSP",
    "LOFF_SENSN", "LOFF_FLIP", "LOFF_STATP", "LOFF_STATN", "GPIO", "MISC1", "MISC2", "CONFIG4",
];

/// ADS1299 driver owning one chip's transport.
///
/// Lifecycle calls come from a single owner. Frames are read on the
/// transport's interrupt thread and handed to the attached [`FrameSink`].
pub struct Ads1299Driver {
    spi: Ads1299Spi,
    pins: Box<dyn ControlPins>,
    drdy: Box<dyn DataReadyLine>,
    delay: Box<dyn Delay>,
    config: DeviceConfig,
    shared: Arc<StreamShared>,
    stats: Arc<AcquisitionStats>,
    status: DriverStatus,
    handler_registered: bool,
    closed: bool,
}

impl Ads1299Driver {
    /// Takes ownership of `transport`. No bus traffic happens until
    /// [`bring_up`](Self::bring_up).
    pub fn open(transport: Transport, config: DeviceConfig) -> Result<Self, DriverError> {
        config.validate()?;
        let Transport { spi, pins, drdy, delay } = transport;

        info!(
            "Ads1299Driver opened: {} channel(s), {}, bias {}",
            config.channel_count,
            config.sample_rate,
            if config.bias_enabled { "on" } else { "off" }
        );

        Ok(Self {
            spi: Ads1299Spi::new(SpiBus::new(spi)),
            pins,
            drdy,
            delay,
            config,
            shared: Arc::new(StreamShared::new(config.channel_count)),
            stats: Arc::new(AcquisitionStats::default()),
            status: DriverStatus::NotInitialized,
            handler_registered: false,
            closed: false,
        })
    }

    /// Power-up sequence: release reset and power-down, let the supplies settle,
    /// pulse reset, then start conversions in continuous-read mode.
    pub fn bring_up(&mut self) -> Result<(), DriverError> {
        info!("Running ADS1299 power-up sequence");
        let result = self.power_up_sequence();
        match &result {
            Ok(()) => {
                self.status = DriverStatus::Ok;
                self.closed = false;
                debug!("ADS1299 powered up");
            }
            Err(e) => {
                error!("ADS1299 power-up failed: {}", e);
                self.status = DriverStatus::Error(e.to_string());
            }
        }
        result
    }

    fn power_up_sequence(&mut self) -> Result<(), DriverError> {
        self.set_pin(ControlPin::Reset, Level::High)?;
        self.set_pin(ControlPin::PowerDown, Level::High)?;
        self.delay.delay(POWER_ON_SETTLE);
        self.toggle_reset()?;
        self.command(CMD_SDATAC)?;
        self.set_pin(ControlPin::Start, Level::High)?;
        self.command(CMD_RDATAC)
    }

    /// Routes frames read during an active stream to `sink` and registers the
    /// data-ready handler if it is not registered yet. Replaces any previous
    /// sink.
    pub fn attach(&mut self, sink: Arc<dyn FrameSink>) -> Result<(), DriverError> {
        self.shared.set_sink(Some(sink));
        if !self.handler_registered {
            let handler = data_ready_handler(self.spi.clone(), self.shared.clone(), self.stats.clone());
            self.drdy
                .subscribe(handler)
                .map_err(|e| DriverError::GpioError(format!("Failed to register DRDY handler: {}", e)))?;
            self.handler_registered = true;
            debug!("DRDY handler registered");
        }
        Ok(())
    }

    /// Deregisters the data-ready handler and drops the sink.
    ///
    /// Returns once no edge is being served any more.
    pub fn detach(&mut self) -> Result<(), DriverError> {
        if self.handler_registered {
            self.drdy
                .unsubscribe()
                .map_err(|e| DriverError::GpioError(format!("Failed to deregister DRDY handler: {}", e)))?;
            self.handler_registered = false;
            debug!("DRDY handler deregistered");
        }
        self.shared.set_sink(None);
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.handler_registered && self.shared.has_sink()
    }

    /// Pulses the reset line without touching stream bookkeeping.
    pub fn reset(&mut self) -> Result<(), DriverError> {
        if self.shared.state() != StreamState::Idle {
            return Err(DriverError::InvalidState(
                "Cannot reset the chip while a stream is active".to_string(),
            ));
        }
        self.toggle_reset()
    }

    /// Stops the current stream, then applies the fields present in `update`.
    pub fn configure(&mut self, update: ConfigUpdate) -> Result<(), DriverError> {
        self.stop_stream()?;
        self.apply_config(&update)
    }

    /// Low-level config store. Refuses any change while a stream is active.
    pub fn apply_config(&mut self, update: &ConfigUpdate) -> Result<(), DriverError> {
        if self.shared.state() != StreamState::Idle {
            return Err(DriverError::InvalidState(
                "Configuration can only change while no stream is active".to_string(),
            ));
        }
        self.config.apply(update)?;
        self.shared.set_channel_count(self.config.channel_count);
        info!("Configuration updated: {:?}", self.config);
        Ok(())
    }

    pub fn start_eeg_stream(&mut self) -> Result<(), DriverError> {
        self.start_stream(StreamMode::Eeg)
    }

    pub fn start_test_stream(&mut self) -> Result<(), DriverError> {
        self.start_stream(StreamMode::Test)
    }

    pub fn start_stream(&mut self, mode: StreamMode) -> Result<(), DriverError> {
        if matches!(self.status, DriverStatus::NotInitialized) || self.closed {
            return Err(DriverError::NotInitialized);
        }

        info!("Starting {:?} stream", mode);
        self.shared.set_state(mode.configuring_state());
        let result = self.configure_stream(mode);
        match &result {
            Ok(()) => {
                self.status = DriverStatus::Running;
                info!("{:?} stream active", mode);
            }
            Err(e) => {
                self.shared.set_state(StreamState::Idle);
                error!("Failed to start {:?} stream: {}", mode, e);
                self.status = DriverStatus::Error(e.to_string());
            }
        }
        result
    }

    fn configure_stream(&mut self, mode: StreamMode) -> Result<(), DriverError> {
        self.reset_ongoing_state()?;
        let active = vec![
            match mode {
                StreamMode::Eeg => CH_EEG,
                StreamMode::Test => CH_TEST_SIGNAL,
            };
            self.config.channel_count as usize
        ];
        match mode {
            StreamMode::Eeg => {
                self.spi.write_registers(CH1SET_ADDR, &active)?;
                self.spi.write_register(MISC1_ADDR, SRB1)?;
                if self.config.bias_enabled {
                    self.setup_bias_drive()?;
                }
            }
            StreamMode::Test => {
                self.spi.write_register(CONFIG2_ADDR, CONFIG2_TEST_SIGNAL)?;
                self.spi.write_registers(CH1SET_ADDR, &active)?;
            }
        }
        self.shared.set_state(mode.streaming_state());
        self.command(CMD_RDATAC)
    }

    /// Halts continuous read and returns every register a stream touches to
    /// its idle value, with all channels shorted.
    fn reset_ongoing_state(&mut self) -> Result<(), DriverError> {
        self.command(CMD_SDATAC)?;
        self.spi.write_register(CONFIG3_ADDR, CONFIG3_DEFAULT)?;
        self.spi.write_register(CONFIG1_ADDR, config1_value(self.config.sample_rate))?;
        self.spi.write_register(CONFIG2_ADDR, CONFIG2_DEFAULT)?;
        self.spi.write_register(BIAS_SENSP_ADDR, BIAS_SENS_OFF_MASK)?;
        self.spi.write_register(BIAS_SENSN_ADDR, BIAS_SENS_OFF_MASK)?;
        self.spi.write_registers(CH1SET_ADDR, &[CH_SHORTED; MAX_CHANNELS as usize])
    }

    fn setup_bias_drive(&mut self) -> Result<(), DriverError> {
        let mask = bias_channel_mask(self.config.channel_count);
        debug!("Bias drive on channels mask 0b{:08b}", mask);
        self.spi.write_register(BIAS_SENSP_ADDR, mask)?;
        self.spi.write_register(BIAS_SENSN_ADDR, mask)?;
        self.spi.write_register(CONFIG3_ADDR, CONFIG3_BIAS_ENABLED)
    }

    /// Stops the active stream. A no-op while idle.
    pub fn stop_stream(&mut self) -> Result<(), DriverError> {
        if self.shared.state() == StreamState::Idle {
            return Ok(());
        }
        // frames arriving from here on are discarded
        self.shared.set_state(StreamState::Idle);
        self.command(CMD_SDATAC)?;
        self.status = DriverStatus::Stopped;
        info!("Stream stopped");
        Ok(())
    }

    /// Stops any stream, deregisters the handler and halts conversions.
    pub fn close(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Ok(());
        }
        info!("Closing Ads1299Driver");
        let stopped = self.stop_stream();
        let detached = self.detach();
        let start_low = self.set_pin(ControlPin::Start, Level::Low);
        self.closed = true;
        self.status = DriverStatus::NotInitialized;
        stopped.and(detached).and(start_low)
    }

    /// Reads one register. Only valid outside continuous-read mode.
    pub fn read_register(&self, addr: u8) -> Result<u8, DriverError> {
        self.spi.read_register(addr)
    }

    /// Writes one register. Only valid while idle and outside continuous-read
    /// mode; stream configuration goes through [`configure`](Self::configure).
    pub fn write_register(&self, addr: u8, value: u8) -> Result<(), DriverError> {
        self.ensure_idle("write a register")?;
        if self.spi.is_continuous_read() {
            return Err(DriverError::InvalidState(format!(
                "Cannot write register 0x{:02X} in continuous-read mode, send SDATAC first",
                addr
            )));
        }
        self.spi.write_register(addr, value)
    }

    /// Sends a single-byte command, e.g. SDATAC before register access.
    /// Refused while a stream is active.
    pub fn send_command(&mut self, opcode: u8) -> Result<(), DriverError> {
        self.ensure_idle("send a command")?;
        self.command(opcode)
    }

    /// Reads the whole register map. Only valid outside continuous-read mode.
    pub fn dump_registers(&self) -> Result<[u8; REGISTER_COUNT], DriverError> {
        let mut values = [0u8; REGISTER_COUNT];
        for (addr, value) in values.iter_mut().enumerate() {
            *value = self.spi.read_register(addr as u8)?;
        }
        info!("----Register Dump----");
        for (addr, (name, value)) in REGISTER_NAMES.iter().zip(values.iter()).enumerate() {
            info!("Reg 0x{:02X} ({:<12}): 0x{:02X}", addr, name, value);
        }
        info!("----End Register Dump----");
        Ok(values)
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    pub fn config(&self) -> DeviceConfig {
        self.config
    }

    pub fn status(&self) -> DriverStatus {
        self.status.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_continuous_read(&self) -> bool {
        self.spi.is_continuous_read()
    }

    fn ensure_idle(&self, action: &str) -> Result<(), DriverError> {
        if self.shared.state() != StreamState::Idle {
            return Err(DriverError::InvalidState(format!(
                "Cannot {} while a stream is active",
                action
            )));
        }
        Ok(())
    }

    fn command(&mut self, opcode: u8) -> Result<(), DriverError> {
        self.spi.send_command(opcode)?;
        self.delay.delay(COMMAND_SETTLE);
        Ok(())
    }

    fn toggle_reset(&mut self) -> Result<(), DriverError> {
        self.set_pin(ControlPin::Reset, Level::Low)?;
        self.delay.delay(RESET_PULSE);
        self.set_pin(ControlPin::Reset, Level::High)?;
        self.delay.delay(RESET_PULSE);
        // the chip comes out of reset in continuous-read mode
        self.spi.assume_continuous_read(true);
        Ok(())
    }

    fn set_pin(&mut self, pin: ControlPin, level: Level) -> Result<(), DriverError> {
        self.pins
            .set(pin, level)
            .map_err(|e| DriverError::GpioError(format!("Failed to drive {:?} {:?}: {}", pin, level, e)))
    }
}

impl Drop for Ads1299Driver {
    fn drop(&mut self) {
        if !self.closed && !matches!(self.status, DriverStatus::NotInitialized) {
            warn!("Ads1299Driver dropped without calling close() first, closing now");
            if let Err(e) = self.close() {
                warn!("Error while closing dropped driver: {}", e);
            }
        } else if self.handler_registered {
            let _ = self.detach();
        }
    }
}
