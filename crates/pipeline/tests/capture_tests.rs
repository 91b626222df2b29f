use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use eeg_types::{DeviceConfig, StreamMode};
use pipeline::capture::{SAMPLE_READ_TIMES_FILE, SAVE_TIMES_FILE};
use pipeline::{CaptureConfig, CaptureSession, StopReason};
use sensors::{Ads1299Driver, SimulatedAds1299, SimulationMode};

fn capture_config(root: &Path) -> CaptureConfig {
    CaptureConfig {
        queue_capacity: 1000,
        drain_threshold: 10,
        poll_interval_ms: 5,
        data_dir: root.join("data"),
        diagnostics_dir: root.join("diagnostics"),
        stop_file: root.join("stop"),
        mode: StreamMode::Test,
        max_duration_secs: None,
    }
}

fn read_times(path: &Path) -> Vec<u64> {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

#[test]
fn test_capture_until_stop_file() {
    let root = tempfile::tempdir().unwrap();
    let config = capture_config(root.path());
    let stop_file = config.stop_file.clone();
    // a stale sentinel must not end the session immediately
    fs::write(&stop_file, b"").unwrap();

    let sim = SimulatedAds1299::new(SimulationMode::Manual).without_delays();
    let device = DeviceConfig::default();
    let mut driver = Ads1299Driver::open(sim.transport(), device).unwrap();
    driver.bring_up().unwrap();

    let edges = {
        let sim = sim.clone();
        thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(10);
            let mut fired = 0;
            while fired < 200 && Instant::now() < deadline {
                if sim.trigger_data_ready() {
                    fired += 1;
                }
                thread::sleep(Duration::from_micros(200));
            }
            fs::write(&stop_file, b"").unwrap();
            fired
        })
    };

    let shutdown = AtomicBool::new(false);
    let report = CaptureSession::new(config.clone()).run(&mut driver, &shutdown).unwrap();
    let fired = edges.join().unwrap();
    assert_eq!(fired, 200);

    assert_eq!(report.stop_reason, StopReason::StopFile);
    assert!(!config.stop_file.exists());
    assert!(report.chunks_written >= 2);
    assert!(report.frames_persisted > 0);
    assert_eq!(report.frames_dropped, 0);

    let frame_len = device.frame_len() as u64;
    let mut total = 0;
    for chunk in &report.chunk_files {
        let name = chunk.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("chunk_") && name.ends_with(".bin"));
        let len = fs::metadata(chunk).unwrap().len();
        assert_eq!(len % frame_len, 0);
        total += len;
    }
    assert_eq!(total, report.bytes_written);
    assert_eq!(total, report.frames_persisted * frame_len);

    let first = fs::read(&report.chunk_files[0]).unwrap();
    assert_eq!(&first[..3], &[0xC0, 0x00, 0x00]);

    let sample_times = read_times(&config.diagnostics_dir.join(SAMPLE_READ_TIMES_FILE));
    let save_times = read_times(&config.diagnostics_dir.join(SAVE_TIMES_FILE));
    assert_eq!(sample_times.len() as u64, report.frames_persisted);
    assert_eq!(save_times.len(), report.chunks_written);
    assert!(sample_times.windows(2).all(|w| w[0] <= w[1]));

    assert_eq!(driver.state(), eeg_types::StreamState::Idle);
    assert!(!driver.is_attached());
    driver.close().unwrap();
}

#[test]
fn test_capture_ends_on_shutdown_flag() {
    let root = tempfile::tempdir().unwrap();
    let config = capture_config(root.path());
    let sim = SimulatedAds1299::new(SimulationMode::FreeRunning).without_delays();
    let mut driver = Ads1299Driver::open(sim.transport(), DeviceConfig::default()).unwrap();
    driver.bring_up().unwrap();

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        flag.store(true, Ordering::Relaxed);
    });

    let report = CaptureSession::new(config.clone()).run(&mut driver, &shutdown).unwrap();
    stopper.join().unwrap();

    assert_eq!(report.stop_reason, StopReason::Shutdown);
    assert!(config.diagnostics_dir.join(SAMPLE_READ_TIMES_FILE).exists());
    assert!(config.diagnostics_dir.join(SAVE_TIMES_FILE).exists());
    let stats = report.queue;
    assert_eq!(stats.produced, stats.delivered + stats.dropped);
    driver.close().unwrap();
}

#[test]
fn test_capture_rejects_bad_threshold() {
    let root = tempfile::tempdir().unwrap();
    let config = CaptureConfig { drain_threshold: 2000, ..capture_config(root.path()) };
    let sim = SimulatedAds1299::new(SimulationMode::Manual).without_delays();
    let mut driver = Ads1299Driver::open(sim.transport(), DeviceConfig::default()).unwrap();
    driver.bring_up().unwrap();

    let shutdown = AtomicBool::new(false);
    assert!(CaptureSession::new(config).run(&mut driver, &shutdown).is_err());
    assert!(!driver.is_attached());
}

#[test]
fn test_capture_refused_while_streaming() {
    let root = tempfile::tempdir().unwrap();
    let sim = SimulatedAds1299::new(SimulationMode::Manual).without_delays();
    let mut driver = Ads1299Driver::open(sim.transport(), DeviceConfig::default()).unwrap();
    driver.bring_up().unwrap();
    driver.start_eeg_stream().unwrap();

    let shutdown = AtomicBool::new(false);
    let result = CaptureSession::new(capture_config(root.path())).run(&mut driver, &shutdown);
    assert!(matches!(result, Err(pipeline::PipelineError::AlreadyRunning)));
    assert_eq!(driver.state(), eeg_types::StreamState::EegStreaming);
}

#[test]
fn test_failed_start_detaches_queue() {
    let root = tempfile::tempdir().unwrap();
    let sim = SimulatedAds1299::new(SimulationMode::Manual).without_delays();
    // never brought up, so the stream cannot start
    let mut driver = Ads1299Driver::open(sim.transport(), DeviceConfig::default()).unwrap();

    let shutdown = AtomicBool::new(false);
    let result = CaptureSession::new(capture_config(root.path())).run(&mut driver, &shutdown);
    assert!(matches!(
        result,
        Err(pipeline::PipelineError::Driver(sensors::DriverError::NotInitialized))
    ));
    assert!(!driver.is_attached());
    assert!(!sim.has_handler());
}
