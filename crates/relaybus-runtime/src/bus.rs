//! The bus facade.
//!
//! `Bus` owns the configuration, the schema gateway and the subscription
//! registry, and tracks every transport client it connected. Messaging goes
//! through the most recently connected client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use relaybus_core::error::{BusError, Result};
use relaybus_core::{BusRequest, BusResponse, Origin};

use crate::config::{BusConfig, ConnectOptions};
use crate::context::BusContext;
use crate::dispatch::{Handler, SubscriptionRegistry};
use crate::request::{self, RequestOptions};
use crate::schema::SchemaGateway;
use crate::services::MetadataService;
use crate::subscription::{self, Subscription, SubscriptionOptions, METADATA_SUBJECT};
use crate::transport::{self, Transport};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// One connected transport client.
#[derive(Clone)]
pub struct BusClient {
    id: u64,
    options: ConnectOptions,
    transport: Arc<dyn Transport>,
}

impl BusClient {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.transport.status().is_connected()
    }
}

impl std::fmt::Debug for BusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusClient")
            .field("id", &self.id)
            .field("addresses", &self.options.addresses)
            .finish()
    }
}

/// Snapshot of the connection flags across all clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStatus {
    pub connected: bool,
    pub closed: bool,
    pub reconnecting: bool,
    pub clients: usize,
}

#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

struct BusInner {
    cfg: BusConfig,
    origin: Origin,
    schemas: Arc<SchemaGateway>,
    registry: Arc<SubscriptionRegistry>,
    clients: Mutex<Vec<BusClient>>,
    /// Context of the client messaging goes through, with its client id.
    active: RwLock<Option<(u64, Arc<BusContext>)>>,
}

impl Bus {
    /// Refuses an invalid config.
    pub fn new(cfg: BusConfig) -> Result<Self> {
        cfg.validate()?;
        let origin = Origin {
            service: cfg.service_name.clone(),
            instance_id: cfg.resolved_instance_id(),
        };
        let schemas = Arc::new(SchemaGateway::new(cfg.disable_schema_cache));
        Ok(Self {
            inner: Arc::new(BusInner {
                cfg,
                origin,
                schemas,
                registry: Arc::new(SubscriptionRegistry::new()),
                clients: Mutex::new(Vec::new()),
                active: RwLock::new(None),
            }),
        })
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.cfg
    }

    pub fn origin(&self) -> &Origin {
        &self.inner.origin
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    pub fn schemas(&self) -> &Arc<SchemaGateway> {
        &self.inner.schemas
    }

    /// Connect to `opts.addresses`; `nats://mock` selects the in-memory
    /// transport. Returns the existing client when one was connected as a
    /// singleton.
    pub async fn connect(&self, opts: impl Into<ConnectOptions>) -> Result<BusClient> {
        let opts = opts.into();
        if let Some(existing) = self.clients().iter().find(|c| c.options.singleton) {
            tracing::debug!(client = existing.id, "reusing singleton bus client");
            return Ok(existing.clone());
        }
        let transport = transport::connect(&opts).await?;
        self.attach(opts, transport).await
    }

    /// Connect over an already open transport, e.g. one `MemoryTransport`
    /// shared by several buses.
    pub async fn connect_with_transport(&self, transport: Arc<dyn Transport>) -> Result<BusClient> {
        self.attach(ConnectOptions::default(), transport).await
    }

    async fn attach(&self, options: ConnectOptions, transport: Arc<dyn Transport>) -> Result<BusClient> {
        let inner = &self.inner;
        let schemas_dir = options.schemas_dir.as_deref().unwrap_or(&inner.cfg.schemas_dir);
        inner.schemas.init(schemas_dir)?;
        inner.registry.clear();

        let client = BusClient {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            options,
            transport: Arc::clone(&transport),
        };
        let ctx = Arc::new(BusContext {
            cfg: inner.cfg.clone(),
            origin: inner.origin.clone(),
            codec: inner.cfg.codec_policy(),
            transport,
            schemas: Arc::clone(&inner.schemas),
            registry: Arc::clone(&inner.registry),
        });

        let metadata = MetadataService::new(
            Arc::clone(&inner.registry),
            Arc::clone(&inner.schemas),
            inner.cfg.source_version.clone(),
        );
        subscription::subscribe(
            Arc::clone(&ctx),
            SubscriptionOptions::new(METADATA_SUBJECT).no_queue_group(),
            Arc::new(metadata),
        )
        .await?;

        *inner.active.write().unwrap_or_else(PoisonError::into_inner) = Some((client.id, ctx));
        self.clients().push(client.clone());
        tracing::info!(
            service = %inner.origin.service,
            instance_id = %inner.origin.instance_id,
            addresses = ?client.options.addresses,
            "connected to bus"
        );
        Ok(client)
    }

    fn clients(&self) -> MutexGuard<'_, Vec<BusClient>> {
        self.inner.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn context(&self) -> Result<Arc<BusContext>> {
        self.inner
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(_, ctx)| Arc::clone(ctx))
            .ok_or(BusError::NotConnected)
    }

    /// Subscribe `handler` to a subject (or full options).
    pub async fn subscribe<H: Handler>(
        &self,
        options: impl Into<SubscriptionOptions>,
        handler: H,
    ) -> Result<Subscription> {
        subscription::subscribe(self.context()?, options.into(), Arc::new(handler)).await
    }

    /// Fire-and-forget publish. The message is sent as is, without
    /// compression or a reply address.
    pub async fn publish(&self, subject: &str, mut req: BusRequest) -> Result<()> {
        let ctx = self.context()?;
        req.from = Some(ctx.origin.clone());
        ctx.publish(subject, &req, None).await
    }

    /// Send `req` and wait for one reply.
    ///
    /// With `throw_errors` (the default) an error-shaped reply, including a
    /// synthesized `BUS_RESPONSE_TIMEOUT`, comes back as `BusError::Response`.
    pub async fn request(&self, subject: &str, req: BusRequest, opts: RequestOptions) -> Result<BusResponse> {
        let ctx = self.context()?;
        request::request(&ctx, subject, req, opts).await
    }

    /// Send `req` and collect up to `max_responses` replies (default 10).
    pub async fn request_many(
        &self,
        subject: &str,
        req: BusRequest,
        opts: RequestOptions,
    ) -> Result<Vec<BusResponse>> {
        let ctx = self.context()?;
        request::request_many(&ctx, subject, req, opts).await
    }

    /// Close one client and forget it.
    pub async fn close(&self, client: &BusClient) {
        client.transport.close().await;
        self.clients().retain(|c| c.id != client.id);
        let mut active = self.inner.active.write().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|(id, _)| *id == client.id) {
            *active = None;
        }
        tracing::info!(client = client.id, "bus client closed");
    }

    /// Close every client.
    pub async fn close_all(&self) {
        let clients = std::mem::take(&mut *self.clients());
        for client in &clients {
            client.transport.close().await;
        }
        *self.inner.active.write().unwrap_or_else(PoisonError::into_inner) = None;
        tracing::info!(clients = clients.len(), "all bus clients closed");
    }

    /// Any client connected.
    pub fn is_connected(&self) -> bool {
        self.clients().iter().any(|c| c.transport.status().is_connected())
    }

    /// At least one client and all of them closed.
    pub fn is_closed(&self) -> bool {
        let clients = self.clients();
        !clients.is_empty() && clients.iter().all(|c| c.transport.status().is_closed())
    }

    pub fn is_reconnecting(&self) -> bool {
        self.clients().iter().any(|c| c.transport.status().is_reconnecting())
    }

    pub fn status(&self) -> BusStatus {
        BusStatus {
            connected: self.is_connected(),
            closed: self.is_closed(),
            reconnecting: self.is_reconnecting(),
            clients: self.clients().len(),
        }
    }

    pub fn connected_clients(&self) -> Vec<BusClient> {
        self.clients().clone()
    }

    /// Forget all clients without closing them.
    pub fn clear_clients(&self) {
        self.clients().clear();
        *self.inner.active.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("origin", &self.inner.origin)
            .field("clients", &self.clients().len())
            .finish()
    }
}
