//! relaybus core: transport-agnostic protocol primitives and error types.
//!
//! This crate defines the wire-level contracts shared by the runtime and by
//! services: message envelopes, subject parsing and matching, payload
//! compression/chunking and the error taxonomy. It carries no transport or
//! async runtime dependencies so it can be reused in multiple contexts.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths must surface as `BusError`/`Result` so a malformed
//! message never brings a service down.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod catalog;
pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{BusError, ErrorCode, Result};
pub use protocol::envelope::{BusRequest, BusResponse, DataMessage, ErrorBody, Origin, User};
