//! Broadcast transport abstraction for the election engine.
//!
//! The engine needs exactly three things from a transport: subscribe to a
//! namespace, publish bytes to a namespace, and receive what others
//! published there (per-publisher FIFO, at least once, possibly lossy).

mod memory;

use tokio::sync::mpsc;

pub use memory::{MemoryBus, MemoryChannel};

use crate::error::ChannelError;
use crate::types::Namespace;

/// A payload received on a subscribed namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    pub namespace: Namespace,
    pub payload: Vec<u8>,
}

/// Publish/subscribe transport.
///
/// In production: any pub/sub mechanism (database notifications, a broker).
/// In tests and simulations: [`MemoryBus`].
#[async_trait::async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Start receiving payloads published to `namespace`.
    async fn subscribe(&self, namespace: &Namespace) -> Result<Subscription, ChannelError>;

    /// Publish `payload` to every subscriber of `namespace`.
    ///
    /// Must not wait for subscriber acknowledgement.
    async fn publish(&self, namespace: &Namespace, payload: Vec<u8>) -> Result<(), ChannelError>;
}

/// Scoped subscription. Dropping it unsubscribes.
pub struct Subscription {
    namespace: Namespace,
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap a receiver; `release` runs exactly once when the subscription is dropped.
    pub fn new(
        namespace: Namespace,
        rx: mpsc::UnboundedReceiver<ChannelEvent>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            namespace,
            rx,
            release: Some(Box::new(release)),
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Next received event. `None` once the transport dropped the subscription.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
