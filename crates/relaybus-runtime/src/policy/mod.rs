//! Policy layer (login gating, scope permissions).
//!
//! Compiles subscription access options into fast lookup structures that the
//! subscription pipeline consults for every inbound message.

pub mod engine;
pub mod permissions;

pub use engine::{AccessPolicy, PolicyDecision};
pub use permissions::{has_permission, RequiredPermissions, ScopeMap};
