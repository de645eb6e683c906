//! Transport layer (subject-based pub/sub).
//!
//! The bus only needs publish, subscribe and unsubscribe from the underlying
//! messaging system. Messages are handed over through per-subscription mpsc
//! channels and decoded once by [`codec`] before reaching the pipeline.

pub mod codec;
pub mod memory;
#[cfg(feature = "nats")]
pub mod nats;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use relaybus_core::error::{BusError, Result};

use crate::config::ConnectOptions;

pub use memory::MemoryTransport;
#[cfg(feature = "nats")]
pub use nats::NatsTransport;

/// Transport-level subscription handle.
pub type SubscriptionId = u64;

/// One raw message as delivered by the transport.
#[derive(Debug, Clone)]
pub struct TransportMessage {
    /// Actual subject the message was published to.
    pub subject: String,
    pub reply_to: Option<String>,
    pub payload: Bytes,
}

/// Inbound messages of one subscription; ends when it is unsubscribed.
pub type MessageStream = mpsc::UnboundedReceiver<TransportMessage>;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn publish(&self, subject: &str, payload: Bytes, reply_to: Option<&str>) -> Result<()>;

    /// `queue` makes this subscriber compete with others in the same group.
    async fn subscribe(
        &self,
        subject: &str,
        queue: Option<&str>,
    ) -> Result<(SubscriptionId, MessageStream)>;

    /// Takes effect immediately; unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    fn status(&self) -> &ConnectionStatus;

    async fn close(&self);
}

/// Unsubscribes its transport subscriptions when dropped.
pub struct SubscriptionGuard {
    transport: Arc<dyn Transport>,
    ids: Vec<SubscriptionId>,
}

impl SubscriptionGuard {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            ids: Vec::new(),
        }
    }

    pub fn track(&mut self, id: SubscriptionId) {
        self.ids.push(id);
    }

    /// Unsubscribe `id` now instead of on drop.
    pub fn release(&mut self, id: SubscriptionId) {
        if let Some(pos) = self.ids.iter().position(|i| *i == id) {
            self.ids.swap_remove(pos);
            self.transport.unsubscribe(id);
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            self.transport.unsubscribe(id);
        }
    }
}

/// Connection lifecycle events reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Reconnecting,
    Reconnected,
    Closed,
    Error(String),
}

/// Connection flags, updated from lifecycle events.
#[derive(Debug, Default)]
pub struct ConnectionStatus {
    connected: AtomicBool,
    closed: AtomicBool,
    reconnecting: AtomicBool,
}

impl ConnectionStatus {
    pub fn on_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected | ConnectionEvent::Reconnected => {
                tracing::info!(?event, "bus connection up");
                self.connected.store(true, Ordering::SeqCst);
                self.reconnecting.store(false, Ordering::SeqCst);
                self.closed.store(false, Ordering::SeqCst);
            }
            ConnectionEvent::Reconnecting => {
                tracing::warn!("lost connection, reconnecting to bus");
                self.connected.store(false, Ordering::SeqCst);
                self.reconnecting.store(true, Ordering::SeqCst);
            }
            ConnectionEvent::Closed => {
                tracing::info!("bus connection closed");
                self.connected.store(false, Ordering::SeqCst);
                self.reconnecting.store(false, Ordering::SeqCst);
                self.closed.store(true, Ordering::SeqCst);
            }
            ConnectionEvent::Error(e) => {
                tracing::error!(error = %e, "bus connection error");
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }
}

/// Open a transport for `opts`.
///
/// Any address containing `mock` selects the in-process transport.
pub async fn connect(opts: &ConnectOptions) -> Result<Arc<dyn Transport>> {
    if opts.addresses.is_empty() || opts.addresses.iter().any(|a| a.trim().is_empty()) {
        return Err(BusError::Config(
            "invalid bus address, expected one or more non-empty addresses".into(),
        ));
    }

    if opts.is_mock() {
        tracing::info!("connecting to in-memory bus");
        return Ok(Arc::new(MemoryTransport::new()));
    }

    connect_remote(opts).await
}

#[cfg(feature = "nats")]
async fn connect_remote(opts: &ConnectOptions) -> Result<Arc<dyn Transport>> {
    Ok(Arc::new(NatsTransport::connect(&opts.addresses).await?))
}

#[cfg(not(feature = "nats"))]
async fn connect_remote(opts: &ConnectOptions) -> Result<Arc<dyn Transport>> {
    Err(BusError::Transport(format!(
        "cannot connect to {}: built without the `nats` feature",
        opts.addresses.join(",")
    )))
}
