//! Subscriber registry and lossy fan-out.

use crate::Event;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Fan-out counters, cumulative since the bus was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WatchStats {
    /// Events handed to `publish`.
    pub published: u64,
    /// Per-subscriber deliveries lost to full queues.
    pub dropped: u64,
}

struct Registration {
    prefix: String,
    tx: mpsc::Sender<Event>,
}

struct Registry {
    next_id: u64,
    subscribers: HashMap<u64, Registration>,
}

struct BusInner {
    registry: RwLock<Registry>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl BusInner {
    fn unregister(&self, id: u64) {
        // Removing the registration drops the sender; the subscriber's
        // receive side then drains whatever was queued and ends.
        self.registry.write().subscribers.remove(&id);
    }
}

/// The notification hub. Cloning shares the same registry.
#[derive(Clone)]
pub struct WatchBus {
    inner: Arc<BusInner>,
}

impl Default for WatchBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WatchBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl WatchBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry: RwLock::new(Registry {
                    next_id: 0,
                    subscribers: HashMap::new(),
                }),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Register a subscriber for keys starting with `prefix` (empty means
    /// all keys), with a bounded event queue of `capacity`.
    pub fn subscribe(&self, prefix: impl Into<String>, capacity: usize) -> Subscriber {
        let prefix = prefix.into();
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let id = {
            let mut registry = self.inner.registry.write();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.subscribers.insert(
                id,
                Registration {
                    prefix: prefix.clone(),
                    tx,
                },
            );
            id
        };
        tracing::debug!(id, prefix = %prefix, "watch subscriber registered");

        Subscriber {
            id,
            prefix,
            rx,
            bus: Arc::clone(&self.inner),
        }
    }

    /// Remove a subscriber and close its queue. Dropping the handle does
    /// the same; doing both is harmless.
    pub fn unsubscribe(&self, subscriber: Subscriber) {
        drop(subscriber);
    }

    /// Deliver `event` to every matching subscriber without blocking. A
    /// full queue costs that subscriber this event and nothing else.
    pub fn publish(&self, event: &Event) {
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let registry = self.inner.registry.read();
        for (id, registration) in &registry.subscribers {
            if !event.matches_prefix(&registration.prefix) {
                continue;
            }
            match registration.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        subscriber = id,
                        key = %event.key,
                        "watch queue full, dropping event"
                    );
                }
                // Receiver already gone; unregistration will catch up.
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.read().subscribers.len()
    }

    pub fn stats(&self) -> WatchStats {
        WatchStats {
            published: self.inner.published.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }

    /// Drop every registration, closing all subscriber queues.
    pub fn close(&self) {
        self.inner.registry.write().subscribers.clear();
    }
}

/// A live watch registration. Events arrive in commit order, modulo drops
/// on overflow. Dropping the handle unsubscribes.
pub struct Subscriber {
    id: u64,
    prefix: String,
    rx: mpsc::Receiver<Event>,
    bus: Arc<BusInner>,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl Subscriber {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Next event, or `None` once the bus has closed this subscription and
    /// the queue is drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.bus.unregister(self.id);
    }
}
