//! Outbound RPC.

mod client;

pub use client::{RequestOptions, DEFAULT_COLLECT_WINDOW, DEFAULT_MAX_RESPONSES};

pub(crate) use client::{request, request_many};
