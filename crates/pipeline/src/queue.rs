//! Bounded frame queue between the data-ready handler and a background consumer
//!
//! The producer half lives in interrupt context: `push` never blocks and
//! never allocates. When the queue is full the frame is dropped and counted.
//! The consumer half is unique, so pops always come from a single thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use eeg_types::RawFrame;
use sensors::{DriverError, FrameSink};
use serde::Serialize;
use tracing::{trace, warn};

/// Log every n-th drop after the first one.
const DROP_LOG_INTERVAL: u64 = 1000;

struct QueueShared {
    queue: ArrayQueue<RawFrame>,
    produced: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
}

/// Counter snapshot of a [`SampleQueue`].
///
/// Once the queue is drained, `delivered + dropped == produced`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub produced: u64,
    pub dropped: u64,
    pub delivered: u64,
}

/// Constructor for the two queue halves.
pub struct SampleQueue;

impl SampleQueue {
    /// Creates a queue holding at most `capacity` frames.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> (QueueProducer, QueueConsumer) {
        let shared = Arc::new(QueueShared {
            queue: ArrayQueue::new(capacity),
            produced: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        });
        (
            QueueProducer { shared: shared.clone() },
            QueueConsumer { shared },
        )
    }
}

/// Producing half. Used as the driver's [`FrameSink`] during capture.
pub struct QueueProducer {
    shared: Arc<QueueShared>,
}

impl QueueProducer {
    /// Enqueues `frame`, or drops it if the queue is full.
    ///
    /// A frame whose length does not match its channel count is rejected
    /// without being counted, so chunks stay aligned to the frame size.
    pub fn push(&self, frame: RawFrame) -> Result<(), DriverError> {
        let expected = frame.expected_len();
        if frame.len() != expected {
            return Err(DriverError::FrameDecodeError { expected, actual: frame.len() });
        }
        let shared = &self.shared;
        shared.produced.fetch_add(1, Ordering::Relaxed);
        match shared.queue.push(frame) {
            Ok(()) => {
                trace!("Frame queued");
                Ok(())
            }
            Err(_) => {
                let dropped = shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % DROP_LOG_INTERVAL == 0 {
                    warn!(dropped, "Sample queue is full, dropping frame");
                }
                Err(DriverError::QueueOverflow)
            }
        }
    }

    pub fn stats(&self) -> QueueStats {
        stats_of(&self.shared)
    }
}

impl FrameSink for QueueProducer {
    fn accept(&self, frame: RawFrame) -> Result<(), DriverError> {
        self.push(frame)
    }
}

/// Consuming half. Not cloneable.
pub struct QueueConsumer {
    shared: Arc<QueueShared>,
}

impl QueueConsumer {
    pub fn pop(&mut self) -> Option<RawFrame> {
        let frame = self.shared.queue.pop()?;
        self.shared.delivered.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    /// Moves every frame currently queued into `out`, oldest first.
    /// Returns how many were moved.
    pub fn drain_into(&mut self, out: &mut Vec<RawFrame>) -> usize {
        let before = out.len();
        while let Some(frame) = self.pop() {
            out.push(frame);
        }
        out.len() - before
    }

    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    pub fn stats(&self) -> QueueStats {
        stats_of(&self.shared)
    }
}

fn stats_of(shared: &QueueShared) -> QueueStats {
    QueueStats {
        produced: shared.produced.load(Ordering::Relaxed),
        dropped: shared.dropped.load(Ordering::Relaxed),
        delivered: shared.delivered.load(Ordering::Relaxed),
    }
}
