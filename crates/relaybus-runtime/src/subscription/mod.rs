//! Subscriptions: one transport subscribe plus the per-message pipeline.
//!
//! Lifecycle: created on subscribe, optionally routed as parent or child when
//! its subject overlaps another subscription, unsubscribed (terminal).
//!
//! Internal routing: the transport cannot tell `a.b.c` from `a.*.c` once
//! both are subscribed, so among overlapping subscriptions the one with the
//! most wildcards keeps the transport subscription and hands messages to
//! the child whose raw subject equals the actual subject.

mod options;
mod pipeline;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use relaybus_core::error::{BusError, Result};
use relaybus_core::protocol::subject::{parse_subject, subjects_overlap, ParsedSubject};

use crate::context::BusContext;
use crate::dispatch::Handler;
use crate::policy::{AccessPolicy, RequiredPermissions};
use crate::transport::{codec, MessageStream, SubscriptionId, TransportMessage};

pub use options::{Docs, SchemaRef, SubscriptionOptions};

/// Reserved subject of the metadata service; never registered.
pub const METADATA_SUBJECT: &str = "metadata";

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

enum RoutingRole {
    Standalone,
    Parent(Vec<Arc<SubscriptionShared>>),
    Child(Weak<SubscriptionShared>),
}

/// Public view of a subscription's routing role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routing {
    Standalone,
    /// Raw subjects of the children, in routing order.
    Parent(Vec<String>),
    /// Raw subject of the parent.
    Child(String),
}

pub struct SubscriptionShared {
    id: u64,
    parsed_raw: String,
    options: RwLock<SubscriptionOptions>,
    parsed: ParsedSubject,
    policy: RwLock<AccessPolicy>,
    request_schema: Option<String>,
    response_schema: Option<String>,
    handler: Arc<dyn Handler>,
    transport_sid: Mutex<Option<SubscriptionId>>,
    role: Mutex<RoutingRole>,
    closed: AtomicBool,
    ctx: Arc<BusContext>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SubscriptionShared {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Raw subject, `:param` segments included.
    pub fn subject(&self) -> &str {
        &self.parsed_raw
    }

    pub fn options(&self) -> SubscriptionOptions {
        self.options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn policy(&self) -> AccessPolicy {
        self.policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_policy(&self, f: impl FnOnce(&mut SubscriptionOptions)) {
        let mut options = self.options.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut options);
        let policy = AccessPolicy::new(options.must_be_logged_in, options.permissions.clone());
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    fn wildcards(&self) -> usize {
        self.parsed.wildcard_count()
    }

    /// Pattern this subscription is reached through: its parent's for a child.
    fn routing_pattern(&self) -> String {
        match &*lock(&self.role) {
            RoutingRole::Child(parent) => parent
                .upgrade()
                .map(|p| p.parsed.pattern.clone())
                .unwrap_or_else(|| self.parsed.pattern.clone()),
            _ => self.parsed.pattern.clone(),
        }
    }

    fn matching_child(&self, actual_subject: &str) -> Option<Arc<SubscriptionShared>> {
        match &*lock(&self.role) {
            RoutingRole::Parent(children) => children
                .iter()
                .find(|c| c.subject() == actual_subject)
                .cloned(),
            _ => None,
        }
    }

    fn routing(&self) -> Routing {
        match &*lock(&self.role) {
            RoutingRole::Standalone => Routing::Standalone,
            RoutingRole::Parent(children) => {
                Routing::Parent(children.iter().map(|c| c.subject().to_string()).collect())
            }
            RoutingRole::Child(parent) => Routing::Child(
                parent
                    .upgrade()
                    .map(|p| p.subject().to_string())
                    .unwrap_or_default(),
            ),
        }
    }

    fn is_attached(&self) -> bool {
        lock(&self.transport_sid).is_some()
    }

    /// Open the transport subscription and start pumping messages.
    async fn attach(self: &Arc<Self>) -> Result<()> {
        let queue = self.options().queue_group();
        let (sid, stream) = self
            .ctx
            .transport
            .subscribe(&self.parsed.pattern, queue.as_deref())
            .await?;
        *lock(&self.transport_sid) = Some(sid);
        tokio::spawn(Arc::clone(self).pump(stream));
        Ok(())
    }

    fn detach(&self) {
        if let Some(sid) = lock(&self.transport_sid).take() {
            self.ctx.transport.unsubscribe(sid);
        }
    }

    async fn pump(self: Arc<Self>, mut stream: MessageStream) {
        while let Some(msg) = stream.recv().await {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.on_message(msg).await });
        }
        tracing::debug!(subject = %self.subject(), "transport subscription ended");
    }

    async fn on_message(self: Arc<Self>, msg: TransportMessage) {
        tracing::trace!(
            subject = %msg.subject,
            message = %String::from_utf8_lossy(&msg.payload),
            "incoming message"
        );
        match codec::decode(&msg.payload) {
            Ok(req) => pipeline::handle_message(self, req, msg.subject, msg.reply_to).await,
            Err(e) => tracing::warn!(subject = %msg.subject, error = %e, "dropping undecodable message"),
        }
    }

    fn set_parent(&self, parent: &Arc<SubscriptionShared>) {
        self.detach();
        *lock(&self.role) = RoutingRole::Child(Arc::downgrade(parent));
    }

    /// Become the catch-all for `children`.
    async fn set_children(self: &Arc<Self>, children: Vec<Arc<SubscriptionShared>>) -> Result<()> {
        for child in &children {
            child.set_parent(self);
        }
        tracing::debug!(
            parent = %self.subject(),
            children = ?children.iter().map(|c| c.subject().to_string()).collect::<Vec<_>>(),
            "internal routing configured"
        );
        *lock(&self.role) = RoutingRole::Parent(children);
        if !self.is_attached() && !self.closed.load(Ordering::SeqCst) {
            self.attach().await?;
        }
        Ok(())
    }

    fn remove_child(&self, id: u64) {
        let mut role = lock(&self.role);
        if let RoutingRole::Parent(children) = &mut *role {
            children.retain(|c| c.id != id);
            if children.is_empty() {
                *role = RoutingRole::Standalone;
            }
        }
    }

    fn unsubscribe(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.ctx.registry.remove(self.id);
        self.detach();

        let role = std::mem::replace(&mut *lock(&self.role), RoutingRole::Standalone);
        match role {
            RoutingRole::Standalone => {}
            RoutingRole::Child(parent) => {
                if let Some(parent) = parent.upgrade() {
                    parent.remove_child(self.id);
                }
            }
            RoutingRole::Parent(children) => {
                for child in &children {
                    *lock(&child.role) = RoutingRole::Standalone;
                }
                reattach_orphans(children);
            }
        }
        tracing::debug!(subject = %self.subject(), "unsubscribed");
    }
}

/// Children of a removed parent get their own transport subscription back.
fn reattach_orphans(children: Vec<Arc<SubscriptionShared>>) {
    let live: Vec<_> = children
        .into_iter()
        .filter(|c| !c.closed.load(Ordering::SeqCst))
        .collect();
    if live.is_empty() {
        return;
    }
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!("no runtime to re-attach orphaned subscriptions");
        return;
    };
    runtime.spawn(async move {
        for child in live {
            if let Err(e) = child.attach().await {
                tracing::warn!(subject = %child.subject(), error = %e, "failed to re-attach subscription");
            }
        }
    });
}

/// Handle to a live subscription.
#[derive(Clone)]
pub struct Subscription {
    shared: Arc<SubscriptionShared>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.shared.id)
            .field("subject", &self.shared.subject())
            .finish()
    }
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn subject(&self) -> &str {
        self.shared.subject()
    }

    /// Transport pattern (`:param` segments as `*`).
    pub fn pattern(&self) -> &str {
        &self.shared.parsed.pattern
    }

    pub fn is_http(&self) -> bool {
        self.shared.parsed.is_http
    }

    pub fn http_method(&self) -> Option<&str> {
        self.shared.parsed.http_method.as_deref()
    }

    pub fn options(&self) -> SubscriptionOptions {
        self.shared.options()
    }

    pub fn routing(&self) -> Routing {
        self.shared.routing()
    }

    /// Holds its own transport subscription.
    pub fn is_attached(&self) -> bool {
        self.shared.is_attached()
    }

    /// Replace the required permissions.
    pub fn permissions(self, permissions: impl Into<RequiredPermissions>) -> Self {
        let permissions = permissions.into();
        self.shared.update_policy(|o| o.permissions = Some(permissions));
        self
    }

    pub fn must_be_logged_in(self) -> Self {
        self.shared.update_policy(|o| o.must_be_logged_in = true);
        self
    }

    /// Stop receiving messages. Safe to call more than once; handlers
    /// already running are not cancelled.
    pub fn unsubscribe(&self) {
        self.shared.unsubscribe();
    }
}

/// Create a subscription on `ctx`.
pub(crate) async fn subscribe(
    ctx: Arc<BusContext>,
    mut options: SubscriptionOptions,
    handler: Arc<dyn Handler>,
) -> Result<Subscription> {
    if options.subject.trim().is_empty() {
        return Err(BusError::InvalidSubscription("subject must not be empty".into()));
    }

    let request_schema = resolve_schema(&ctx, options.request_schema.take())?;
    let response_schema = resolve_schema(&ctx, options.response_schema.take())?;
    options.request_schema = request_schema.clone().map(SchemaRef::Id);
    options.response_schema = response_schema.clone().map(SchemaRef::Id);

    let parsed = parse_subject(&options.subject);
    let policy = AccessPolicy::new(options.must_be_logged_in, options.permissions.clone());
    let create_queue_group = options.create_queue_group;
    let is_metadata = options.subject == METADATA_SUBJECT;

    let shared = Arc::new(SubscriptionShared {
        id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        parsed_raw: options.subject.clone(),
        options: RwLock::new(options),
        parsed,
        policy: RwLock::new(policy),
        request_schema,
        response_schema,
        handler,
        transport_sid: Mutex::new(None),
        role: Mutex::new(RoutingRole::Standalone),
        closed: AtomicBool::new(false),
        ctx: Arc::clone(&ctx),
    });

    shared.attach().await?;
    tracing::debug!(subject = %shared.subject(), pattern = %shared.parsed.pattern, "registered subscribe");

    if create_queue_group && !is_metadata {
        configure_routing(&ctx, &shared).await?;
    }
    if !is_metadata {
        ctx.registry.insert(Arc::clone(&shared));
    }

    Ok(Subscription { shared })
}

/// Inline schemas are stored under their hash; `""` means no schema.
fn resolve_schema(ctx: &BusContext, schema: Option<SchemaRef>) -> Result<Option<String>> {
    match schema {
        None => Ok(None),
        Some(SchemaRef::Id(id)) if id.is_empty() => Ok(None),
        Some(SchemaRef::Id(id)) => Ok(Some(id)),
        Some(SchemaRef::Inline(schema)) => ctx.schemas.add_inline(schema).map(Some),
    }
}

/// Route overlapping subscriptions through one catch-all.
///
/// The catch-all is the subscription with the most wildcards; on a tie the
/// earliest registered one wins.
async fn configure_routing(ctx: &BusContext, sub: &Arc<SubscriptionShared>) -> Result<()> {
    let pattern = &sub.parsed.pattern;
    let mut all: Vec<Arc<SubscriptionShared>> = ctx
        .registry
        .snapshot()
        .into_iter()
        .filter(|other| subjects_overlap(pattern, &other.routing_pattern()))
        .collect();

    if all.is_empty() {
        return Ok(());
    }
    all.push(Arc::clone(sub));

    let mut catch_all = Arc::clone(sub);
    if let Some(best) = all.iter().reduce(|best, cur| {
        if cur.wildcards() > best.wildcards() {
            cur
        } else {
            best
        }
    }) {
        catch_all = Arc::clone(best);
    }

    let children = all
        .into_iter()
        .filter(|s| !Arc::ptr_eq(s, &catch_all))
        .collect();
    catch_all.set_children(children).await
}
