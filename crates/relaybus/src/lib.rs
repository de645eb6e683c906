//! Top-level facade crate for relaybus.
//!
//! Re-exports the protocol primitives and the bus runtime so services can depend on a single crate.

pub mod core {
    pub use relaybus_core::*;
}

pub mod runtime {
    pub use relaybus_runtime::*;
}

pub use relaybus_runtime::{Bus, RequestOptions, SubscriptionOptions};
