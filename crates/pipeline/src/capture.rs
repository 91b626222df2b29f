//! Unattended capture: frames are queued in interrupt context and persisted
//! in batches by a polling loop until a stop sentinel appears.

use std::fs::{self, create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use eeg_types::{RawFrame, StreamMode};
use sensors::ads1299::helpers::current_timestamp_micros;
use sensors::{Ads1299Driver, StatsSnapshot};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::queue::{QueueConsumer, QueueStats, SampleQueue};

pub const SAMPLE_READ_TIMES_FILE: &str = "sample_read_times.json";
pub const SAVE_TIMES_FILE: &str = "save_times.json";

/// Parameters of a capture session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Frames the queue can hold before new ones are dropped.
    pub queue_capacity: usize,
    /// Queue depth above which a batch is written.
    pub drain_threshold: usize,
    pub poll_interval_ms: u64,
    pub data_dir: PathBuf,
    pub diagnostics_dir: PathBuf,
    /// The session ends once this file exists.
    pub stop_file: PathBuf,
    pub mode: StreamMode,
    /// Optional limit on the session length.
    pub max_duration_secs: Option<u64>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 20_000,
            drain_threshold: 4_000,
            poll_interval_ms: 100,
            data_dir: PathBuf::from("data"),
            diagnostics_dir: PathBuf::from("diagnostics"),
            stop_file: PathBuf::from("stop"),
            mode: StreamMode::Test,
            max_duration_secs: None,
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.queue_capacity == 0 {
            return Err(PipelineError::InvalidConfiguration {
                message: "queue_capacity must be greater than 0".to_string(),
            });
        }
        if self.drain_threshold >= self.queue_capacity {
            return Err(PipelineError::InvalidConfiguration {
                message: format!(
                    "drain_threshold ({}) must be below queue_capacity ({})",
                    self.drain_threshold, self.queue_capacity
                ),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Why the polling loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    StopFile,
    Shutdown,
    Duration,
    Error,
}

/// Outcome of a capture session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureReport {
    pub chunks_written: usize,
    pub frames_persisted: u64,
    pub frames_dropped: u64,
    pub bytes_written: u64,
    pub chunk_files: Vec<PathBuf>,
    pub stop_reason: StopReason,
    pub queue: QueueStats,
    pub acquisition: StatsSnapshot,
}

#[derive(Default)]
struct Persisted {
    chunk_files: Vec<PathBuf>,
    frames: u64,
    bytes: u64,
    sample_read_times: Vec<u64>,
    save_times: Vec<u64>,
}

pub struct CaptureSession {
    config: CaptureConfig,
}

impl CaptureSession {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Streams from `driver` until the stop file exists, `shutdown` is set or
    /// the optional duration elapses.
    ///
    /// On the way out the handler is deregistered, the stream stopped, the
    /// remaining frames flushed as a final chunk, the stop file removed and the
    /// diagnostics written, even if persisting a batch failed.
    pub fn run(&self, driver: &mut Ads1299Driver, shutdown: &AtomicBool) -> PipelineResult<CaptureReport> {
        let config = &self.config;
        config.validate()?;
        if driver.state().is_active() {
            return Err(PipelineError::AlreadyRunning);
        }
        create_dir_all(&config.data_dir)?;
        create_dir_all(&config.diagnostics_dir)?;
        remove_stop_file(&config.stop_file)?;

        let (producer, mut consumer) = SampleQueue::new(config.queue_capacity);
        driver.attach(Arc::new(producer))?;
        if let Err(e) = driver.start_stream(config.mode) {
            if let Err(detach_err) = driver.detach() {
                warn!("Could not detach capture queue after failed start: {}", detach_err);
            }
            return Err(e.into());
        }
        info!(
            mode = ?config.mode,
            capacity = config.queue_capacity,
            threshold = config.drain_threshold,
            stop_file = %config.stop_file.display(),
            "Capture session started"
        );

        let mut persisted = Persisted::default();
        let loop_result = self.poll_loop(&mut consumer, &mut persisted, shutdown);
        let stop_reason = match &loop_result {
            Ok(reason) => *reason,
            Err(_) => StopReason::Error,
        };

        // the handler must be gone before the final drain
        let detached = driver.detach();
        let stopped = driver.stop_stream();
        let flushed = self.flush(&mut consumer, &mut persisted);
        let removed = remove_stop_file(&config.stop_file);
        let diagnostics = self.write_diagnostics(&persisted);

        loop_result?;
        detached?;
        stopped?;
        flushed?;
        removed?;
        diagnostics?;

        let queue = consumer.stats();
        let report = CaptureReport {
            chunks_written: persisted.chunk_files.len(),
            frames_persisted: persisted.frames,
            frames_dropped: queue.dropped,
            bytes_written: persisted.bytes,
            chunk_files: persisted.chunk_files,
            stop_reason,
            queue,
            acquisition: driver.stats(),
        };
        info!(
            chunks = report.chunks_written,
            frames = report.frames_persisted,
            dropped = report.frames_dropped,
            reason = ?report.stop_reason,
            "Capture session finished"
        );
        Ok(report)
    }

    fn poll_loop(
        &self,
        consumer: &mut QueueConsumer,
        persisted: &mut Persisted,
        shutdown: &AtomicBool,
    ) -> PipelineResult<StopReason> {
        let config = &self.config;
        let started = Instant::now();
        let max_duration = config.max_duration_secs.map(Duration::from_secs);

        loop {
            if config.stop_file.exists() {
                info!("Stop file found, ending capture");
                return Ok(StopReason::StopFile);
            }
            if shutdown.load(Ordering::Relaxed) {
                info!("Shutdown requested, ending capture");
                return Ok(StopReason::Shutdown);
            }
            if max_duration.is_some_and(|limit| started.elapsed() >= limit) {
                info!("Capture duration reached");
                return Ok(StopReason::Duration);
            }

            if consumer.len() > config.drain_threshold {
                self.flush(consumer, persisted)?;
            }
            thread::sleep(config.poll_interval());
        }
    }

    /// Drains everything queued into one chunk file. Writes nothing if the
    /// queue is empty.
    fn flush(&self, consumer: &mut QueueConsumer, persisted: &mut Persisted) -> PipelineResult<()> {
        let mut frames = Vec::with_capacity(consumer.len());
        if consumer.drain_into(&mut frames) == 0 {
            return Ok(());
        }

        let path = chunk_path(&self.config.data_dir);
        let bytes = write_chunk(&path, &frames)?;
        let saved_at = current_timestamp_micros();

        persisted.sample_read_times.extend(frames.iter().map(|f| f.captured_at_us));
        persisted.save_times.push(saved_at);
        persisted.frames += frames.len() as u64;
        persisted.bytes += bytes;
        debug!(frames = frames.len(), bytes, path = %path.display(), "Chunk written");
        persisted.chunk_files.push(path);
        Ok(())
    }

    fn write_diagnostics(&self, persisted: &Persisted) -> PipelineResult<()> {
        let dir = &self.config.diagnostics_dir;
        write_json(&dir.join(SAMPLE_READ_TIMES_FILE), &persisted.sample_read_times)?;
        write_json(&dir.join(SAVE_TIMES_FILE), &persisted.save_times)?;
        Ok(())
    }
}

/// `<dir>/chunk_<YYYYmmdd_HHMMSSffffff>.bin`, made unique if a chunk with the
/// same timestamp already exists.
fn chunk_path(dir: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S%6f").to_string();
    let mut path = dir.join(format!("chunk_{}.bin", stamp));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("chunk_{}_{}.bin", stamp, n));
        n += 1;
    }
    path
}

fn write_chunk(path: &Path, frames: &[RawFrame]) -> PipelineResult<u64> {
    let mut buffer = Vec::with_capacity(frames.iter().map(RawFrame::len).sum());
    for frame in frames {
        buffer.extend_from_slice(frame.as_bytes());
    }
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&buffer)?;
    writer.flush()?;
    Ok(buffer.len() as u64)
}

fn write_json(path: &Path, values: &[u64]) -> PipelineResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, values)?;
    writer.flush()?;
    Ok(())
}

fn remove_stop_file(path: &Path) -> PipelineResult<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed stop file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            warn!(path = %path.display(), "Could not remove stop file: {}", e);
            Err(e.into())
        }
    }
}
