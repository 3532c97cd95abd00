//! In-process broadcast bus.
//!
//! Every [`MemoryChannel`] endpoint created from one [`MemoryBus`] sees what
//! the others publish to the namespaces it subscribed to, including its own
//! publishes (like database notifications). Each endpoint carries its own
//! fault switches so tests can silence, break or disconnect a single node.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use super::{Channel, ChannelEvent, Subscription};
use crate::error::ChannelError;
use crate::types::Namespace;

struct Subscriber {
    endpoint: u64,
    namespace: Namespace,
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

#[derive(Default)]
struct BusInner {
    next_subscription: u64,
    subscribers: HashMap<u64, Subscriber>,
    offline: bool,
}

/// Shared in-memory pub/sub hub. Cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<BusInner>>,
    next_endpoint: Arc<AtomicU64>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new endpoint (one per node).
    pub fn channel(&self) -> MemoryChannel {
        MemoryChannel {
            bus: self.clone(),
            id: self.next_endpoint.fetch_add(1, Ordering::Relaxed),
            faults: Arc::new(EndpointFaults::default()),
        }
    }

    /// Deliver raw bytes to every subscriber of `namespace`.
    ///
    /// Returns the number of subscribers reached.
    pub fn publish_raw(&self, namespace: &Namespace, payload: Vec<u8>) -> usize {
        let mut inner = self.lock();
        let mut closed = Vec::new();
        let mut delivered = 0;
        for (id, sub) in inner.subscribers.iter() {
            if sub.namespace != *namespace {
                continue;
            }
            let event = ChannelEvent {
                namespace: namespace.clone(),
                payload: payload.clone(),
            };
            if sub.tx.send(event).is_ok() {
                delivered += 1;
            } else {
                closed.push(*id);
            }
        }
        for id in closed {
            inner.subscribers.remove(&id);
        }
        delivered
    }

    /// Take the whole transport down (or bring it back).
    ///
    /// While offline every publish and subscribe fails.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Drop every live subscription; receivers observe end-of-stream.
    pub fn disconnect_all(&self) {
        self.lock().subscribers.clear();
    }

    /// Number of live subscriptions on `namespace`.
    pub fn subscriber_count(&self, namespace: &Namespace) -> usize {
        self.lock()
            .subscribers
            .values()
            .filter(|s| s.namespace == *namespace)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unsubscribe(&self, id: u64) {
        if self.lock().subscribers.remove(&id).is_some() {
            debug!(subscription = id, "memory bus: unsubscribed");
        }
    }
}

#[derive(Default)]
struct EndpointFaults {
    muted: AtomicBool,
    failing: AtomicBool,
}

/// One node's view of a [`MemoryBus`]. Clones share fault switches.
#[derive(Clone)]
pub struct MemoryChannel {
    bus: MemoryBus,
    id: u64,
    faults: Arc<EndpointFaults>,
}

impl MemoryChannel {
    /// Publishes succeed but reach nobody (outbound partition).
    pub fn set_muted(&self, muted: bool) {
        self.faults.muted.store(muted, Ordering::SeqCst);
    }

    /// Publishes fail with [`ChannelError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.faults.failing.store(failing, Ordering::SeqCst);
    }

    /// Drop this endpoint's subscriptions; its receivers observe end-of-stream.
    pub fn disconnect(&self) {
        self.bus
            .lock()
            .subscribers
            .retain(|_, sub| sub.endpoint != self.id);
    }

    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }
}

#[async_trait::async_trait]
impl Channel for MemoryChannel {
    async fn subscribe(&self, namespace: &Namespace) -> Result<Subscription, ChannelError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut inner = self.bus.lock();
            if inner.offline {
                return Err(ChannelError::Unavailable {
                    reason: "memory bus offline".into(),
                });
            }
            let id = inner.next_subscription;
            inner.next_subscription += 1;
            inner.subscribers.insert(
                id,
                Subscriber {
                    endpoint: self.id,
                    namespace: namespace.clone(),
                    tx,
                },
            );
            id
        };
        debug!(subscription = id, namespace = %namespace, "memory bus: subscribed");

        let bus = self.bus.clone();
        Ok(Subscription::new(namespace.clone(), rx, move || {
            bus.unsubscribe(id)
        }))
    }

    async fn publish(&self, namespace: &Namespace, payload: Vec<u8>) -> Result<(), ChannelError> {
        if self.bus.lock().offline || self.faults.failing.load(Ordering::SeqCst) {
            return Err(ChannelError::Unavailable {
                reason: "memory bus offline".into(),
            });
        }
        if self.faults.muted.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.bus.publish_raw(namespace, payload);
        Ok(())
    }
}
