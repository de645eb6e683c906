//! In-process transport with NATS delivery semantics.
//!
//! - `*` matches exactly one token, `>` one or more trailing tokens.
//! - Plain subscribers all receive a copy of every matching message.
//! - Subscribers sharing a queue group get one copy per group, handed out
//!   round-robin.
//!
//! Several buses may share one instance to talk to each other in tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use relaybus_core::error::{BusError, Result};
use relaybus_core::protocol::subject::match_subject;

use super::{
    ConnectionEvent, ConnectionStatus, MessageStream, SubscriptionId, Transport, TransportMessage,
};

struct MemorySubscription {
    id: SubscriptionId,
    pattern: String,
    queue: Option<String>,
    tx: mpsc::UnboundedSender<TransportMessage>,
}

pub struct MemoryTransport {
    subs: Mutex<Vec<MemorySubscription>>,
    next_id: AtomicU64,
    round_robin: AtomicUsize,
    status: ConnectionStatus,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        let status = ConnectionStatus::default();
        status.on_event(ConnectionEvent::Connected);
        Self {
            subs: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            round_robin: AtomicUsize::new(0),
            status,
        }
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.lock().len()
    }

    /// Live subscriptions on exactly `pattern`.
    pub fn subscriptions_on(&self, pattern: &str) -> usize {
        self.lock().iter().filter(|s| s.pattern == pattern).count()
    }

    // Sends never block, so holding the lock across delivery is fine.
    // A poisoned lock only means a panic elsewhere; the list itself is intact.
    fn lock(&self) -> MutexGuard<'_, Vec<MemorySubscription>> {
        self.subs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, subject: &str, payload: Bytes, reply_to: Option<&str>) -> Result<()> {
        if self.status.is_closed() {
            return Err(BusError::NotConnected);
        }

        let msg = TransportMessage {
            subject: subject.to_string(),
            reply_to: reply_to.map(str::to_string),
            payload,
        };

        let mut subs = self.lock();
        let mut groups: BTreeMap<&str, Vec<&MemorySubscription>> = BTreeMap::new();
        let mut delivered = 0usize;

        for sub in subs.iter().filter(|s| match_subject(subject, &s.pattern)) {
            match sub.queue.as_deref() {
                Some(queue) => groups.entry(queue).or_default().push(sub),
                None => {
                    if sub.tx.send(msg.clone()).is_ok() {
                        delivered += 1;
                    }
                }
            }
        }

        for members in groups.values() {
            let pick = self.round_robin.fetch_add(1, Ordering::Relaxed) % members.len();
            if let Some(member) = members.get(pick) {
                if member.tx.send(msg.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }

        subs.retain(|s| !s.tx.is_closed());
        tracing::trace!(subject, delivered, "memory transport publish");
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue: Option<&str>,
    ) -> Result<(SubscriptionId, MessageStream)> {
        if self.status.is_closed() {
            return Err(BusError::NotConnected);
        }
        if subject.is_empty() {
            return Err(BusError::InvalidSubscription("subject must not be empty".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(MemorySubscription {
            id,
            pattern: subject.to_string(),
            queue: queue.map(str::to_string),
            tx,
        });
        Ok((id, rx))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().retain(|s| s.id != id);
    }

    fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    async fn close(&self) {
        self.lock().clear();
        self.status.on_event(ConnectionEvent::Closed);
    }
}
