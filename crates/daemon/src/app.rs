//! Transport selection and the two run modes of the daemon.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::ValueEnum;
use eeg_types::{Sample, StreamMode};
use pipeline::{CaptureReport, EegSystem, SystemStats};
use sensors::{SimulatedAds1299, SimulationMode, Transport};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DaemonConfig;

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Broadcast decoded samples to in-process clients.
    Stream,
    /// Persist raw frames to chunk files until the stop file appears.
    Capture,
}

/// Options taken from the command line.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub mode: RunMode,
    pub simulate: bool,
    pub test_signal: bool,
    pub duration: Option<Duration>,
}

impl RunOptions {
    fn stream_mode(&self, configured: StreamMode) -> StreamMode {
        if self.test_signal {
            StreamMode::Test
        } else {
            configured
        }
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Streamed(SystemStats),
    Captured(CaptureReport),
}

/// Opens the board, or the simulated chip when asked to or when the board is
/// unavailable and the configuration allows the fallback.
pub fn open_transport(config: &DaemonConfig, simulate: bool) -> Result<Transport> {
    if simulate {
        info!("Using simulated ADS1299");
        return Ok(SimulatedAds1299::new(SimulationMode::FreeRunning).transport());
    }
    match boards::open_transport(&config.hardware) {
        Ok(transport) => {
            info!(hardware = ?config.hardware, "Opened ADS1299 board");
            Ok(transport)
        }
        Err(e) if config.fallback_to_simulated => {
            warn!("Board unavailable ({}), falling back to simulated ADS1299", e);
            Ok(SimulatedAds1299::new(SimulationMode::FreeRunning).transport())
        }
        Err(e) => Err(e).context("could not open the ADS1299 board"),
    }
}

/// Runs the daemon until `shutdown` is set or the optional duration elapses.
/// Blocking; the caller runs it off the async runtime.
pub fn run(config: DaemonConfig, options: RunOptions, shutdown: &AtomicBool) -> Result<RunOutcome> {
    let transport = open_transport(&config, options.simulate)?;
    let mut system = EegSystem::open(transport, config.device).context("could not bring up the ADS1299")?;

    match options.mode {
        RunMode::Stream => {
            let mode = options.stream_mode(StreamMode::Eeg);
            let stats = stream(system, mode, options.duration, shutdown)?;
            Ok(RunOutcome::Streamed(stats))
        }
        RunMode::Capture => {
            let mut capture = config.capture.clone();
            capture.mode = options.stream_mode(capture.mode);
            if let Some(duration) = options.duration {
                capture.max_duration_secs = Some(duration.as_secs().max(1));
            }
            let report = system.capture(&capture, shutdown).context("capture failed")?;
            system.close()?;
            Ok(RunOutcome::Captured(report))
        }
    }
}

/// Streams into a client that logs a summary once per second of data.
fn stream(mut system: EegSystem, mode: StreamMode, duration: Option<Duration>, shutdown: &AtomicBool) -> Result<SystemStats> {
    let rate = system.config().sample_rate.hz() as u64;
    let mut received = 0u64;
    system.register_client(move |sample: &Sample| {
        received += 1;
        if received % rate == 0 {
            info!(samples = received, first_channel = sample.values.first().copied(), "Streaming");
        } else {
            debug!(timestamp_us = sample.timestamp_us, "Sample");
        }
    });

    system.start_stream(mode)?;
    let started = Instant::now();
    while !shutdown.load(Ordering::Relaxed) && duration.map_or(true, |limit| started.elapsed() < limit) {
        thread::sleep(SHUTDOWN_POLL);
    }
    system.stop_stream()?;
    Ok(system.close()?)
}
