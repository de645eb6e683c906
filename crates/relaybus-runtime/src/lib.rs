//! relaybus runtime library entry.
//!
//! Wires the transport, schema gateway, access policy, subscription engine and
//! request client behind the [`Bus`] facade. Consumed by services, by the
//! demo binary (`main.rs`) and by integration tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod bus;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod policy;
pub mod request;
pub mod schema;
pub mod services;
pub mod subscription;
pub mod transport;

pub use bus::{Bus, BusClient, BusStatus};
pub use config::{BusConfig, ConnectOptions};
pub use dispatch::{from_async, Handler, HandlerError, HandlerResult, Reply};
pub use policy::RequiredPermissions;
pub use request::RequestOptions;
pub use subscription::{Docs, Routing, SchemaRef, Subscription, SubscriptionOptions};
pub use transport::{MemoryTransport, Transport};
