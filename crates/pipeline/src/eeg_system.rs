//! One ADS1299 instance together with its clients.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};

use eeg_types::{ConfigUpdate, DeviceConfig, StreamMode, StreamState};
use sensors::{Ads1299Driver, DriverStatus, StatsSnapshot, Transport};
use serde::Serialize;
use tracing::{info, warn};

use crate::capture::{CaptureConfig, CaptureReport, CaptureSession};
use crate::clients::{ClientId, ClientRegistry, SampleClient};
use crate::dispatch::{self, DispatchSink, DispatchWorker, DEFAULT_DISPATCH_CAPACITY};
use crate::error::PipelineResult;

/// Counters of the acquisition path and the dispatch thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SystemStats {
    pub acquisition: StatsSnapshot,
    pub dispatched: u64,
}

/// Owns the driver, the client registry and the dispatch thread.
///
/// Samples decoded while a stream is active are broadcast to every
/// registered client, in registration order, on the dispatch thread.
pub struct EegSystem {
    driver: Ads1299Driver,
    registry: Arc<Mutex<ClientRegistry>>,
    sink: DispatchSink,
    worker: DispatchWorker,
}

impl EegSystem {
    /// Opens and powers up the chip behind `transport`.
    pub fn open(transport: Transport, config: DeviceConfig) -> PipelineResult<Self> {
        Self::with_capacity(transport, config, DEFAULT_DISPATCH_CAPACITY)
    }

    pub fn with_capacity(transport: Transport, config: DeviceConfig, capacity: usize) -> PipelineResult<Self> {
        let mut driver = Ads1299Driver::open(transport, config)?;
        driver.bring_up()?;

        let registry = Arc::new(Mutex::new(ClientRegistry::new()));
        let (sink, rx) = dispatch::channel(capacity.max(1));
        let worker = DispatchWorker::spawn(rx, registry.clone())?;
        driver.attach(Arc::new(sink.clone()))?;

        info!(?config, capacity, "EEG system ready");
        Ok(Self { driver, registry, sink, worker })
    }

    fn registry(&self) -> MutexGuard<'_, ClientRegistry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register_client(&self, client: impl SampleClient + 'static) -> ClientId {
        self.registry().register(client)
    }

    pub fn unregister_client(&self, id: ClientId) -> bool {
        self.registry().unregister(id)
    }

    pub fn client_count(&self) -> usize {
        self.registry().len()
    }

    pub fn start_eeg_stream(&mut self) -> PipelineResult<()> {
        self.start_stream(StreamMode::Eeg)
    }

    pub fn start_test_stream(&mut self) -> PipelineResult<()> {
        self.start_stream(StreamMode::Test)
    }

    pub fn start_stream(&mut self, mode: StreamMode) -> PipelineResult<()> {
        if !self.driver.is_attached() {
            self.driver.attach(Arc::new(self.sink.clone()))?;
        }
        Ok(self.driver.start_stream(mode)?)
    }

    pub fn stop_stream(&mut self) -> PipelineResult<()> {
        Ok(self.driver.stop_stream()?)
    }

    /// Stops the current stream, then applies the fields present in `update`.
    pub fn configure(&mut self, update: ConfigUpdate) -> PipelineResult<()> {
        Ok(self.driver.configure(update)?)
    }

    /// Runs an unattended capture on this chip. Client dispatch resumes with
    /// the next stream start.
    pub fn capture(&mut self, config: &CaptureConfig, shutdown: &AtomicBool) -> PipelineResult<CaptureReport> {
        CaptureSession::new(config.clone()).run(&mut self.driver, shutdown)
    }

    pub fn state(&self) -> StreamState {
        self.driver.state()
    }

    pub fn config(&self) -> DeviceConfig {
        self.driver.config()
    }

    pub fn status(&self) -> DriverStatus {
        self.driver.status()
    }

    pub fn stats(&self) -> SystemStats {
        SystemStats {
            acquisition: self.driver.stats(),
            dispatched: self.worker.delivered(),
        }
    }

    pub fn driver(&self) -> &Ads1299Driver {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut Ads1299Driver {
        &mut self.driver
    }

    /// Closes the chip and stops the dispatch thread after it has delivered
    /// everything already decoded.
    pub fn close(mut self) -> PipelineResult<SystemStats> {
        let result = self.driver.close();
        self.worker.stop();
        let stats = self.stats();
        result?;
        info!(?stats, "EEG system closed");
        Ok(stats)
    }
}

impl Drop for EegSystem {
    fn drop(&mut self) {
        if let Err(e) = self.driver.close() {
            warn!("Error while closing EEG system: {}", e);
        }
    }
}
