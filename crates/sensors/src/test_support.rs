//! A transport that records every bus, pin and delay operation in order.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::transport::{
    ControlPin, ControlPins, DataReadyHandler, DataReadyLine, Delay, Level, SpiPort, Transport,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Transfer(Vec<u8>),
    Pin(ControlPin, Level),
    Delay(Duration),
    Subscribe,
    Unsubscribe,
}

#[derive(Default)]
struct Recorded {
    events: Vec<BusEvent>,
    responses: VecDeque<Vec<u8>>,
    short_transfers: VecDeque<usize>,
}

#[derive(Clone, Default)]
pub struct RecordingBus {
    recorded: Arc<Mutex<Recorded>>,
    handler: Arc<Mutex<Option<DataReadyHandler>>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port(&self) -> RecordingPort {
        RecordingPort(self.clone())
    }

    pub fn transport(&self) -> Transport {
        Transport::new(RecordingPort(self.clone()), RecordingPins(self.clone()), RecordingDrdy(self.clone()))
            .with_delay(RecordingDelay(self.clone()))
    }

    /// Queues bytes to be received by the next transfer.
    pub fn respond_with(&self, bytes: Vec<u8>) {
        self.recorded.lock().unwrap().responses.push_back(bytes);
    }

    /// Makes the next transfer report only `len` bytes transferred.
    pub fn short_transfer(&self, len: usize) {
        self.recorded.lock().unwrap().short_transfers.push_back(len);
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.recorded.lock().unwrap().events.clone()
    }

    pub fn transfers(&self) -> Vec<Vec<u8>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                BusEvent::Transfer(bytes) => Some(bytes),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.recorded.lock().unwrap().events.clear();
    }

    pub fn is_subscribed(&self) -> bool {
        self.handler.lock().unwrap().is_some()
    }

    /// Simulates one falling edge on DRDY.
    pub fn fire_data_ready(&self) {
        if let Some(handler) = self.handler.lock().unwrap().as_mut() {
            handler();
        }
    }

    fn push(&self, event: BusEvent) {
        self.recorded.lock().unwrap().events.push(event);
    }
}

pub struct RecordingPort(RecordingBus);

impl SpiPort for RecordingPort {
    fn transfer(&mut self, read_buffer: &mut [u8], write_buffer: &[u8]) -> io::Result<usize> {
        let mut recorded = self.0.recorded.lock().unwrap();
        recorded.events.push(BusEvent::Transfer(write_buffer.to_vec()));
        if let Some(response) = recorded.responses.pop_front() {
            let n = response.len().min(read_buffer.len());
            read_buffer[..n].copy_from_slice(&response[..n]);
        }
        let transferred = recorded.short_transfers.pop_front().unwrap_or(write_buffer.len());
        Ok(transferred.min(write_buffer.len()))
    }
}

struct RecordingPins(RecordingBus);

impl ControlPins for RecordingPins {
    fn set(&mut self, pin: ControlPin, level: Level) -> io::Result<()> {
        self.0.push(BusEvent::Pin(pin, level));
        Ok(())
    }
}

struct RecordingDrdy(RecordingBus);

impl DataReadyLine for RecordingDrdy {
    fn subscribe(&mut self, handler: DataReadyHandler) -> io::Result<()> {
        self.0.push(BusEvent::Subscribe);
        *self.0.handler.lock().unwrap() = Some(handler);
        Ok(())
    }

    fn unsubscribe(&mut self) -> io::Result<()> {
        self.0.push(BusEvent::Unsubscribe);
        self.0.handler.lock().unwrap().take();
        Ok(())
    }
}

struct RecordingDelay(RecordingBus);

impl Delay for RecordingDelay {
    fn delay(&mut self, duration: Duration) {
        self.0.push(BusEvent::Delay(duration));
    }
}
