use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use relaybus_core::error::Result;
use relaybus_core::protocol::codec::CodecPolicy;
use relaybus_core::Origin;

use crate::config::BusConfig;
use crate::dispatch::SubscriptionRegistry;
use crate::schema::SchemaGateway;
use crate::transport::{codec, Transport};

/// Everything a subscription or request needs from its bus connection.
pub struct BusContext {
    pub cfg: BusConfig,
    pub origin: Origin,
    pub codec: CodecPolicy,
    pub transport: Arc<dyn Transport>,
    pub schemas: Arc<SchemaGateway>,
    pub registry: Arc<SubscriptionRegistry>,
}

impl BusContext {
    pub fn service_name(&self) -> &str {
        &self.origin.service
    }

    /// Encode and publish one envelope.
    pub async fn publish<T: Serialize>(&self, subject: &str, msg: &T, reply_to: Option<&str>) -> Result<()> {
        let payload = codec::encode(msg)?;
        tracing::trace!(
            subject,
            reply_to = ?reply_to,
            message = %String::from_utf8_lossy(&payload),
            "outgoing message"
        );
        self.transport.publish(subject, payload, reply_to).await
    }
}

impl fmt::Debug for BusContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusContext")
            .field("origin", &self.origin)
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}
