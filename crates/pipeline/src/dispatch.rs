//! Hand-off from the data-ready handler to the client dispatch thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use eeg_types::{RawFrame, Sample};
use flume::{Receiver, RecvTimeoutError, Sender, TrySendError};
use sensors::ads1299::helpers::decode_frame;
use sensors::{DriverError, FrameSink};
use thread_priority::ThreadPriority;
use tracing::{debug, info, warn};

use crate::clients::ClientRegistry;
use crate::error::{PipelineError, PipelineResult};

/// Default number of decoded samples buffered between the handler and the
/// dispatch thread.
pub const DEFAULT_DISPATCH_CAPACITY: usize = 4096;

const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Creates the bounded hand-off channel.
pub fn channel(capacity: usize) -> (DispatchSink, Receiver<Sample>) {
    let (tx, rx) = flume::bounded(capacity);
    (DispatchSink { tx }, rx)
}

/// Frame sink that decodes in interrupt context and enqueues without
/// blocking.
#[derive(Clone)]
pub struct DispatchSink {
    tx: Sender<Sample>,
}

impl FrameSink for DispatchSink {
    fn accept(&self, frame: RawFrame) -> Result<(), DriverError> {
        let sample = decode_frame(&frame)?;
        match self.tx.try_send(sample) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DriverError::QueueOverflow),
            Err(TrySendError::Disconnected(_)) => {
                Err(DriverError::Other("Dispatch worker has stopped".to_string()))
            }
        }
    }
}

/// Background thread broadcasting samples to the client registry.
pub struct DispatchWorker {
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
}

impl DispatchWorker {
    pub fn spawn(rx: Receiver<Sample>, registry: Arc<Mutex<ClientRegistry>>) -> PipelineResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let delivered = Arc::new(AtomicU64::new(0));
        let stop_flag = stop.clone();
        let delivered_count = delivered.clone();

        let handle = thread::Builder::new()
            .name("sample_dispatch".into())
            .spawn(move || {
                if let Err(e) = thread_priority::set_current_thread_priority(ThreadPriority::Max) {
                    debug!("Could not raise dispatch thread priority: {:?}", e);
                }
                info!("Dispatch thread started");

                let deliver = |sample: Sample| {
                    let mut registry = registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    registry.broadcast(&sample);
                    delivered_count.fetch_add(1, Ordering::Relaxed);
                };

                while !stop_flag.load(Ordering::Relaxed) {
                    match rx.recv_timeout(RECV_TIMEOUT) {
                        Ok(sample) => deliver(sample),
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => {
                            debug!("Sample channel disconnected");
                            break;
                        }
                    }
                }
                // samples already handed off are still delivered
                for sample in rx.try_iter() {
                    deliver(sample);
                }
                info!("Dispatch thread shutting down");
            })
            .map_err(|source| PipelineError::ThreadSpawn { name: "sample_dispatch", source })?;

        Ok(Self {
            handle: Some(handle),
            stop,
            delivered,
        })
    }

    /// Number of samples broadcast so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Signals the thread, lets it flush what is queued, and joins it.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Dispatch thread panicked");
            }
        }
    }
}

impl Drop for DispatchWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
