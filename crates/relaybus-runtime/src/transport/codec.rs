//! Decode-once codec for bus envelopes.
//!
//! Envelopes travel as JSON. Payloads that fail to decode are reported as
//! `BusError::Codec` so the caller can drop them without tearing down the
//! subscription.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use relaybus_core::error::{BusError, Result};

pub fn encode<T: Serialize>(msg: &T) -> Result<Bytes> {
    serde_json::to_vec(msg)
        .map(Bytes::from)
        .map_err(|e| BusError::Codec(format!("encode envelope: {e}")))
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(|e| BusError::Codec(format!("invalid envelope json: {e}")))
}
