//! Context types shared across layers.
//!
//! `BusContext` is the per-connection state a subscription or request works
//! against; `request` carries the ambient context of the message being
//! handled.

pub mod bus;
pub mod request;

pub use bus::BusContext;
pub use request::{current, current_req_id, current_subject, current_user, RequestContext};
