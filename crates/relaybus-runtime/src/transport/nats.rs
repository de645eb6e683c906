//! NATS adapter (`async-nats`).
//!
//! Each subscription gets a forwarding task that pipes the NATS subscriber
//! into the bus channel; unsubscribing aborts the task, which drops the
//! subscriber and sends UNSUB to the server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use relaybus_core::error::{BusError, Result};

use super::{
    ConnectionEvent, ConnectionStatus, MessageStream, SubscriptionId, Transport, TransportMessage,
};

pub struct NatsTransport {
    client: async_nats::Client,
    forwarders: DashMap<SubscriptionId, JoinHandle<()>>,
    next_id: AtomicU64,
    status: Arc<ConnectionStatus>,
}

impl NatsTransport {
    pub async fn connect(addresses: &[String]) -> Result<Self> {
        let status = Arc::new(ConnectionStatus::default());
        let events = Arc::clone(&status);
        let servers = addresses.join(",");

        tracing::info!(address = %servers, "connecting to NATS bus");
        let client = async_nats::ConnectOptions::new()
            .event_callback(move |event| {
                let events = Arc::clone(&events);
                async move {
                    match event {
                        async_nats::Event::Connected => events.on_event(ConnectionEvent::Reconnected),
                        async_nats::Event::Disconnected => {
                            events.on_event(ConnectionEvent::Reconnecting)
                        }
                        async_nats::Event::Closed => events.on_event(ConnectionEvent::Closed),
                        other => events.on_event(ConnectionEvent::Error(other.to_string())),
                    }
                }
            })
            .connect(servers.as_str())
            .await
            .map_err(|e| BusError::Transport(format!("connect {servers}: {e}")))?;

        status.on_event(ConnectionEvent::Connected);

        Ok(Self {
            client,
            forwarders: DashMap::new(),
            next_id: AtomicU64::new(1),
            status,
        })
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn publish(&self, subject: &str, payload: Bytes, reply_to: Option<&str>) -> Result<()> {
        let res = match reply_to {
            Some(reply) => {
                self.client
                    .publish_with_reply(subject.to_string(), reply.to_string(), payload)
                    .await
            }
            None => self.client.publish(subject.to_string(), payload).await,
        };
        res.map_err(|e| BusError::Transport(format!("publish {subject}: {e}")))
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue: Option<&str>,
    ) -> Result<(SubscriptionId, MessageStream)> {
        let mut subscriber = match queue {
            Some(queue) => {
                self.client
                    .queue_subscribe(subject.to_string(), queue.to_string())
                    .await
            }
            None => self.client.subscribe(subject.to_string()).await,
        }
        .map_err(|e| BusError::Transport(format!("subscribe {subject}: {e}")))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let forwarder = tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                let forwarded = TransportMessage {
                    subject: msg.subject.to_string(),
                    reply_to: msg.reply.map(|r| r.to_string()),
                    payload: msg.payload,
                };
                if tx.send(forwarded).is_err() {
                    break;
                }
            }
        });
        self.forwarders.insert(id, forwarder);

        Ok((id, rx))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Some((_, forwarder)) = self.forwarders.remove(&id) {
            forwarder.abort();
        }
    }

    fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    async fn close(&self) {
        for entry in self.forwarders.iter() {
            entry.value().abort();
        }
        self.forwarders.clear();
        if let Err(e) = self.client.flush().await {
            tracing::warn!(error = %e, "flush before close failed");
        }
        self.status.on_event(ConnectionEvent::Closed);
    }
}
