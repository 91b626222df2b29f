//! A [`Transport`] backed by the simulated ADS1299.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::device::DeviceModel;
use crate::transport::{
    ControlPin, ControlPins, DataReadyHandler, DataReadyLine, Delay, Level, SpiPort, StdDelay, Transport,
};

/// How data-ready edges are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationMode {
    /// A ticker thread raises DRDY at the configured data rate whenever the
    /// chip is converting.
    FreeRunning,
    /// Edges are only raised by [`SimulatedAds1299::trigger_data_ready`].
    Manual,
}

struct SimShared {
    model: Mutex<DeviceModel>,
    handler: Mutex<Option<DataReadyHandler>>,
}

impl SimShared {
    fn model(&self) -> MutexGuard<'_, DeviceModel> {
        self.model.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handler(&self) -> MutexGuard<'_, Option<DataReadyHandler>> {
        self.handler.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs the registered handler once. Holding the handler lock for the call
    /// is what lets `unsubscribe` wait for an in-flight edge.
    fn raise_data_ready(&self) -> bool {
        let mut handler = self.handler();
        match handler.as_mut() {
            Some(handler) => {
                handler();
                true
            }
            None => false,
        }
    }
}

/// Offline ADS1299: a register and command model with synthetic signals.
///
/// Cheap to clone; every clone observes the same device.
#[derive(Clone)]
pub struct SimulatedAds1299 {
    shared: Arc<SimShared>,
    mode: SimulationMode,
    honour_delays: bool,
}

impl SimulatedAds1299 {
    pub fn new(mode: SimulationMode) -> Self {
        Self::with_seed(mode, 0x5EED)
    }

    /// Seeds the synthetic EEG so runs are reproducible.
    pub fn with_seed(mode: SimulationMode, seed: u64) -> Self {
        Self {
            shared: Arc::new(SimShared {
                model: Mutex::new(DeviceModel::new(seed)),
                handler: Mutex::new(None),
            }),
            mode,
            honour_delays: true,
        }
    }

    /// Skips the bring-up and settle delays. Meant for tests.
    pub fn without_delays(mut self) -> Self {
        self.honour_delays = false;
        self
    }

    pub fn mode(&self) -> SimulationMode {
        self.mode
    }

    /// Builds a transport wired to this device.
    pub fn transport(&self) -> Transport {
        let transport = Transport::new(
            SimSpi(self.shared.clone()),
            SimPins(self.shared.clone()),
            SimDataReady {
                shared: self.shared.clone(),
                mode: self.mode,
                ticker: None,
            },
        );
        if self.honour_delays {
            transport.with_delay(StdDelay)
        } else {
            transport.with_delay(NoDelay)
        }
    }

    /// Raises one data-ready edge if the chip is converting and a handler is
    /// registered. Returns whether the handler ran.
    pub fn trigger_data_ready(&self) -> bool {
        if !self.shared.model().is_converting() {
            return false;
        }
        self.shared.raise_data_ready()
    }

    pub fn register(&self, addr: u8) -> u8 {
        self.shared.model().register(addr)
    }

    pub fn is_continuous_read(&self) -> bool {
        self.shared.model().is_continuous_read()
    }

    pub fn is_converting(&self) -> bool {
        self.shared.model().is_converting()
    }

    pub fn has_handler(&self) -> bool {
        self.shared.handler().is_some()
    }

    /// Number of data frames clocked out so far.
    pub fn frames_served(&self) -> u64 {
        self.shared.model().samples_produced()
    }
}

struct SimSpi(Arc<SimShared>);

impl SpiPort for SimSpi {
    fn transfer(&mut self, read_buffer: &mut [u8], write_buffer: &[u8]) -> io::Result<usize> {
        Ok(self.0.model().transfer(read_buffer, write_buffer))
    }
}

struct SimPins(Arc<SimShared>);

impl ControlPins for SimPins {
    fn set(&mut self, pin: ControlPin, level: Level) -> io::Result<()> {
        self.0.model().set_pin(pin, level);
        Ok(())
    }
}

struct NoDelay;

impl Delay for NoDelay {
    fn delay(&mut self, _duration: Duration) {}
}

struct Ticker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct SimDataReady {
    shared: Arc<SimShared>,
    mode: SimulationMode,
    ticker: Option<Ticker>,
}

impl SimDataReady {
    fn spawn_ticker(&mut self) -> io::Result<()> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let shared = self.shared.clone();

        let handle = thread::Builder::new()
            .name("ads1299_sim_drdy".into())
            .spawn(move || {
                debug!("Simulated DRDY ticker started");
                let mut next = Instant::now();
                while !stop_flag.load(Ordering::Relaxed) {
                    let (converting, rate) = {
                        let model = shared.model();
                        (model.is_converting(), model.sample_rate_hz())
                    };
                    let period = Duration::from_micros(1_000_000 / rate.max(1) as u64);
                    next += period;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else if now - next > period * 10 {
                        // fell far behind, resynchronise instead of bursting
                        next = now;
                    }
                    if converting {
                        shared.raise_data_ready();
                    }
                }
                debug!("Simulated DRDY ticker stopped");
            })?;

        self.ticker = Some(Ticker { stop, handle });
        Ok(())
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.stop.store(true, Ordering::Relaxed);
            if ticker.handle.join().is_err() {
                warn!("Simulated DRDY ticker panicked");
            }
        }
    }
}

impl DataReadyLine for SimDataReady {
    fn subscribe(&mut self, handler: DataReadyHandler) -> io::Result<()> {
        *self.shared.handler() = Some(handler);
        if self.mode == SimulationMode::FreeRunning && self.ticker.is_none() {
            self.spawn_ticker()?;
            info!("Simulated ADS1299 free-running DRDY enabled");
        }
        Ok(())
    }

    fn unsubscribe(&mut self) -> io::Result<()> {
        self.stop_ticker();
        // waits for a manual edge in progress
        self.shared.handler().take();
        Ok(())
    }
}

impl Drop for SimDataReady {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}
