//! Dispatch exports.
//!
//! Handler model and the registry of live subscriptions.

pub mod handler;
pub mod registry;

pub use handler::{from_async, Handler, HandlerError, HandlerResult, Reply};
pub use registry::SubscriptionRegistry;
