//! Protocol modules (envelopes, subjects, payload codec).
//!
//! This module hosts the wire contracts of the bus:
//! - Envelopes: JSON request/response/data-chunk messages.
//! - Subjects: param parsing, wildcard matching and reply-subject naming.
//! - Codec: compression and chunking of oversized payloads.
//!
//! All parsers are panic-free: malformed input is reported as `BusError`
//! instead of panicking, so a bad message never takes a subscription down.

pub mod codec;
pub mod envelope;
pub mod subject;
