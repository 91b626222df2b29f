//! Data-ready handling for the ADS1299 driver.
//!
//! The transport calls the handler built here once per falling edge on DRDY.
//! It reads exactly one frame and hands it to the attached [`FrameSink`]; it
//! never blocks on a consumer and never lets an error or panic escape into the
//! transport's interrupt thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use eeg_types::{RawFrame, StreamState};
use log::{error, trace, warn};
use serde::Serialize;

use super::spi::Ads1299Spi;
use crate::transport::DataReadyHandler;
use crate::types::DriverError;

/// Log every n-th overflow after the first one.
const OVERFLOW_LOG_INTERVAL: u64 = 1000;

/// Destination for frames read while a stream is active.
///
/// `accept` runs in interrupt context: it must not block and should not
/// allocate on the raw-capture path. A full destination reports
/// [`DriverError::QueueOverflow`].
pub trait FrameSink: Send + Sync + 'static {
    fn accept(&self, frame: RawFrame) -> Result<(), DriverError>;
}

/// Stream bookkeeping shared between the driver and the edge handler.
pub(crate) struct StreamShared {
    state: AtomicU8,
    channel_count: AtomicU8,
    sink: RwLock<Option<Arc<dyn FrameSink>>>,
}

impl StreamShared {
    pub(crate) fn new(channel_count: u8) -> Self {
        Self {
            state: AtomicU8::new(StreamState::Idle as u8),
            channel_count: AtomicU8::new(channel_count),
            sink: RwLock::new(None),
        }
    }

    pub(crate) fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: StreamState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn channel_count(&self) -> u8 {
        self.channel_count.load(Ordering::Acquire)
    }

    pub(crate) fn set_channel_count(&self, channel_count: u8) {
        self.channel_count.store(channel_count, Ordering::Release);
    }

    pub(crate) fn set_sink(&self, sink: Option<Arc<dyn FrameSink>>) {
        let mut slot = self.sink.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = sink;
    }

    fn sink(&self) -> Option<Arc<dyn FrameSink>> {
        self.sink
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn has_sink(&self) -> bool {
        self.sink().is_some()
    }
}

/// Counters maintained by the edge handler.
#[derive(Debug, Default)]
pub struct AcquisitionStats {
    frames_read: AtomicU64,
    discarded: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    decode_errors: AtomicU64,
    read_errors: AtomicU64,
    sink_errors: AtomicU64,
    panics: AtomicU64,
}

/// Point-in-time copy of [`AcquisitionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Frames clocked out of the chip.
    pub frames_read: u64,
    /// Frames read while no stream was active.
    pub discarded: u64,
    /// Frames accepted by the sink.
    pub delivered: u64,
    /// Frames the sink had no room for.
    pub dropped: u64,
    pub decode_errors: u64,
    pub read_errors: u64,
    pub sink_errors: u64,
    pub panics: u64,
}

impl AcquisitionStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
        }
    }

    fn record_overflow(&self) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if dropped == 1 || dropped % OVERFLOW_LOG_INTERVAL == 0 {
            warn!("Frame sink full, {} frame(s) dropped so far", dropped);
        }
    }
}

/// Builds the handler the driver registers on the data-ready line.
pub(crate) fn data_ready_handler(
    spi: Ads1299Spi,
    shared: Arc<StreamShared>,
    stats: Arc<AcquisitionStats>,
) -> DataReadyHandler {
    Box::new(move || {
        let result = panic::catch_unwind(AssertUnwindSafe(|| on_data_ready(&spi, &shared, &stats)));
        if result.is_err() {
            let panics = stats.panics.fetch_add(1, Ordering::Relaxed) + 1;
            error!("Data-ready handler panicked ({} total), continuing", panics);
        }
    })
}

/// Serves one data-ready edge.
pub(crate) fn on_data_ready(spi: &Ads1299Spi, shared: &StreamShared, stats: &AcquisitionStats) {
    let frame = match spi.read_frame(shared.channel_count()) {
        Ok(frame) => frame,
        Err(e) => {
            let errors = stats.read_errors.fetch_add(1, Ordering::Relaxed) + 1;
            if errors == 1 || errors % OVERFLOW_LOG_INTERVAL == 0 {
                warn!("Failed to read frame on data-ready: {} ({} total)", e, errors);
            }
            return;
        }
    };
    stats.frames_read.fetch_add(1, Ordering::Relaxed);

    if !shared.state().is_active() {
        trace!("No active stream, discarding {:?}", frame);
        stats.discarded.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let Some(sink) = shared.sink() else {
        stats.discarded.fetch_add(1, Ordering::Relaxed);
        return;
    };

    // a short transfer would misalign every frame persisted after it
    let expected = frame.expected_len();
    if frame.len() != expected {
        let errors = stats.decode_errors.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            "Dropping frame of {} byte(s), expected {} ({} total)",
            frame.len(),
            expected,
            errors
        );
        return;
    }

    match sink.accept(frame) {
        Ok(()) => {
            stats.delivered.fetch_add(1, Ordering::Relaxed);
        }
        Err(DriverError::QueueOverflow) => stats.record_overflow(),
        Err(e @ DriverError::FrameDecodeError { .. }) => {
            stats.decode_errors.fetch_add(1, Ordering::Relaxed);
            warn!("Dropping frame: {}", e);
        }
        Err(e) => {
            stats.sink_errors.fetch_add(1, Ordering::Relaxed);
            warn!("Frame sink rejected frame: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spi_bus::SpiBus;
    use crate::test_support::RecordingBus;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        frames: Mutex<Vec<RawFrame>>,
        capacity: usize,
    }

    impl FrameSink for CollectingSink {
        fn accept(&self, frame: RawFrame) -> Result<(), DriverError> {
            let mut frames = self.frames.lock().unwrap();
            if frames.len() >= self.capacity {
                return Err(DriverError::QueueOverflow);
            }
            frames.push(frame);
            Ok(())
        }
    }

    struct PanickingSink;

    impl FrameSink for PanickingSink {
        fn accept(&self, _frame: RawFrame) -> Result<(), DriverError> {
            panic!("sink exploded");
        }
    }

    fn setup(channel_count: u8) -> (RecordingBus, Ads1299Spi, Arc<StreamShared>, Arc<AcquisitionStats>) {
        let recorder = RecordingBus::new();
        let spi = Ads1299Spi::new(SpiBus::new(Box::new(recorder.port())));
        (
            recorder,
            spi,
            Arc::new(StreamShared::new(channel_count)),
            Arc::new(AcquisitionStats::default()),
        )
    }

    #[test]
    fn test_inactive_stream_reads_and_discards() {
        let (recorder, spi, shared, stats) = setup(2);
        let sink = Arc::new(CollectingSink { capacity: 10, ..Default::default() });
        shared.set_sink(Some(sink.clone()));

        on_data_ready(&spi, &shared, &stats);

        assert_eq!(recorder.transfers(), vec![vec![0u8; 9]]);
        assert!(sink.frames.lock().unwrap().is_empty());
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_read, 1);
        assert_eq!(snapshot.discarded, 1);
    }

    #[test]
    fn test_active_stream_delivers_and_counts_overflow() {
        let (_recorder, spi, shared, stats) = setup(1);
        let sink = Arc::new(CollectingSink { capacity: 2, ..Default::default() });
        shared.set_sink(Some(sink.clone()));
        shared.set_state(StreamState::TestStreaming);

        for _ in 0..5 {
            on_data_ready(&spi, &shared, &stats);
        }

        assert_eq!(sink.frames.lock().unwrap().len(), 2);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.delivered, 2);
        assert_eq!(snapshot.dropped, 3);
        assert_eq!(snapshot.frames_read, 5);
    }

    #[test]
    fn test_configuring_state_discards() {
        let (_recorder, spi, shared, stats) = setup(1);
        shared.set_sink(Some(Arc::new(CollectingSink { capacity: 2, ..Default::default() })));
        shared.set_state(StreamState::ConfiguringEeg);

        on_data_ready(&spi, &shared, &stats);
        assert_eq!(stats.snapshot().discarded, 1);
    }

    #[test]
    fn test_handler_contains_panics() {
        let (recorder, spi, shared, stats) = setup(1);
        shared.set_sink(Some(Arc::new(PanickingSink)));
        shared.set_state(StreamState::EegStreaming);

        let mut handler = data_ready_handler(spi.clone(), shared, stats.clone());
        handler();
        handler();

        assert_eq!(stats.snapshot().panics, 2);
        // the bus still serves transfers after a panicking sink
        assert!(spi.read_frame(1).is_ok());
        assert_eq!(recorder.transfers().len(), 3);
    }

    #[test]
    fn test_short_frame_is_dropped_before_the_sink() {
        let (recorder, spi, shared, stats) = setup(1);
        let sink = Arc::new(CollectingSink { capacity: 10, ..Default::default() });
        shared.set_sink(Some(sink.clone()));
        shared.set_state(StreamState::TestStreaming);

        recorder.short_transfer(4);
        on_data_ready(&spi, &shared, &stats);
        on_data_ready(&spi, &shared, &stats);

        let frames = sink.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), frames[0].expected_len());
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_read, 2);
        assert_eq!(snapshot.decode_errors, 1);
        assert_eq!(snapshot.delivered, 1);
    }

    struct PanicOnceSpi {
        panicked: bool,
    }

    impl crate::transport::SpiPort for PanicOnceSpi {
        fn transfer(&mut self, _read: &mut [u8], write: &[u8]) -> std::io::Result<usize> {
            if !self.panicked {
                self.panicked = true;
                panic!("bus fault");
            }
            Ok(write.len())
        }
    }

    #[test]
    fn test_panic_inside_transfer_leaves_bus_usable() {
        let spi = Ads1299Spi::new(SpiBus::new(Box::new(PanicOnceSpi { panicked: false })));
        let shared = Arc::new(StreamShared::new(1));
        let stats = Arc::new(AcquisitionStats::default());
        let sink = Arc::new(CollectingSink { capacity: 10, ..Default::default() });
        shared.set_sink(Some(sink.clone()));
        shared.set_state(StreamState::EegStreaming);

        let mut handler = data_ready_handler(spi, shared, stats.clone());
        handler();
        handler();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.panics, 1);
        assert_eq!(snapshot.delivered, 1);
        assert_eq!(sink.frames.lock().unwrap().len(), 1);
    }
}
