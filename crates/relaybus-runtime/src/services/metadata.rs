use std::sync::Arc;

use serde_json::json;

use relaybus_core::{BusRequest, BusResponse};

use crate::dispatch::{Handler, Reply, SubscriptionRegistry};
use crate::schema::SchemaGateway;

/// Answers `metadata` with the registered subscriptions and loaded schemas.
pub struct MetadataService {
    registry: Arc<SubscriptionRegistry>,
    schemas: Arc<SchemaGateway>,
    source_version: String,
}

impl MetadataService {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        schemas: Arc<SchemaGateway>,
        source_version: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            schemas,
            source_version: source_version.into(),
        }
    }
}

impl Handler for MetadataService {
    fn handle(&self, _req: BusRequest) -> Reply {
        let exposing = self.registry.exposing();
        tracing::debug!(subscriptions = exposing.len(), "answering metadata request");
        BusResponse::ok(json!({
            "exposing": exposing,
            "schemas": self.schemas.all(),
            "sourceVersion": self.source_version,
        }))
        .into()
    }
}
