//! Sample consumers and the registry that broadcasts to them.

use std::panic::{self, AssertUnwindSafe};

use eeg_types::Sample;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Receives every decoded sample while a stream is active.
///
/// Called on the dispatch worker thread. A slow client delays later
/// deliveries to every client but never stalls acquisition.
pub trait SampleClient: Send {
    fn on_sample(&mut self, sample: &Sample);
}

impl<F> SampleClient for F
where
    F: FnMut(&Sample) + Send,
{
    fn on_sample(&mut self, sample: &Sample) {
        self(sample)
    }
}

/// Handle identifying a registered client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(u64);

/// Clients in registration order.
#[derive(Default)]
pub struct ClientRegistry {
    next_id: u64,
    clients: Vec<(ClientId, Box<dyn SampleClient>)>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: impl SampleClient + 'static) -> ClientId {
        self.register_boxed(Box::new(client))
    }

    pub fn register_boxed(&mut self, client: Box<dyn SampleClient>) -> ClientId {
        let id = ClientId(self.next_id);
        self.next_id += 1;
        self.clients.push((id, client));
        debug!(?id, total = self.clients.len(), "Client registered");
        id
    }

    /// Removes a client. Returns false if `id` was not registered.
    pub fn unregister(&mut self, id: ClientId) -> bool {
        let before = self.clients.len();
        self.clients.retain(|(client_id, _)| *client_id != id);
        before != self.clients.len()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Delivers `sample` to every client in registration order.
    ///
    /// A client that panics is removed; the others still receive the sample.
    pub fn broadcast(&mut self, sample: &Sample) {
        let mut panicked = Vec::new();
        for (id, client) in self.clients.iter_mut() {
            if panic::catch_unwind(AssertUnwindSafe(|| client.on_sample(sample))).is_err() {
                error!(?id, "Client panicked while handling a sample, unregistering it");
                panicked.push(*id);
            }
        }
        for id in panicked {
            self.unregister(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn sample(v: f64) -> Sample {
        Sample { values: vec![v], timestamp_us: 0 }
    }

    #[test]
    fn test_broadcast_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ClientRegistry::new();
        for name in ["a", "b", "c"] {
            let log = log.clone();
            registry.register(move |s: &Sample| log.lock().unwrap().push((name, s.values[0])));
        }

        registry.broadcast(&sample(1.0));
        registry.broadcast(&sample(2.0));
        assert_eq!(
            *log.lock().unwrap(),
            vec![("a", 1.0), ("b", 1.0), ("c", 1.0), ("a", 2.0), ("b", 2.0), ("c", 2.0)]
        );
    }

    #[test]
    fn test_unregister() {
        let count = Arc::new(Mutex::new(0));
        let mut registry = ClientRegistry::new();
        let c = count.clone();
        let first = registry.register(move |_: &Sample| *c.lock().unwrap() += 1);
        let c = count.clone();
        registry.register(move |_: &Sample| *c.lock().unwrap() += 10);

        assert!(registry.unregister(first));
        assert!(!registry.unregister(first));
        registry.broadcast(&sample(0.0));
        assert_eq!(*count.lock().unwrap(), 10);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_panicking_client_is_removed() {
        let count = Arc::new(Mutex::new(0));
        let mut registry = ClientRegistry::new();
        registry.register(|_: &Sample| panic!("bad client"));
        let c = count.clone();
        registry.register(move |_: &Sample| *c.lock().unwrap() += 1);

        registry.broadcast(&sample(0.0));
        registry.broadcast(&sample(0.0));
        assert_eq!(*count.lock().unwrap(), 2);
        assert_eq!(registry.len(), 1);
    }
}
