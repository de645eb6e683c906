//! Payload compression and chunking (panic-free).
//!
//! Rules:
//! - Compression is zlib deflate of the JSON-serialized `data`, base64 encoded.
//! - Chunking only ever applies to the compressed representation, so chunk
//!   size bounds the encoded string and not the raw payload.
//! - Never index slices directly; malformed input surfaces as `BusError::Codec`.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BusError, Result};
use crate::protocol::envelope::Payload;

/// The only supported `dataEncoding`.
pub const GZIP: &str = "gzip";

/// Upper bound on the `chunks` a receiver accepts unless configured otherwise.
pub const DEFAULT_MAX_CHUNKS: u32 = 1024;

/// How outbound payloads get compressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionStrategy {
    /// Compress when the serialized payload exceeds the threshold.
    #[default]
    Auto,
    /// Compress only when the sender set `dataEncoding` to `gzip`.
    Manual,
}

/// Size limits applied to every outbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecPolicy {
    pub strategy: CompressionStrategy,
    pub compress_threshold: usize,
    pub chunk_size: usize,
    /// Largest `chunks` count accepted from a peer.
    pub max_chunks: u32,
}

impl CodecPolicy {
    /// Reassembly buffer for a peer-announced chunk count, bounded by `max_chunks`.
    pub fn chunk_buffer(&self, total: u32) -> Result<ChunkBuffer> {
        ChunkBuffer::new(total, self.max_chunks)
    }

    /// Decide whether `msg` should be compressed before publishing.
    pub fn should_compress<P: Payload>(&self, msg: &P) -> bool {
        if msg.data_encoding() == Some(GZIP) {
            return true;
        }
        if self.strategy != CompressionStrategy::Auto || msg.data().is_null() {
            return false;
        }
        serde_json::to_string(msg.data())
            .map(|s| s.len() > self.compress_threshold)
            .unwrap_or(false)
    }

    /// Compress `msg` if needed and split the result into chunks when it still
    /// exceeds the chunk size.
    ///
    /// Returns the chunks (empty when the payload fits in one message). The
    /// caller decides whether to replace `data` with the placeholder.
    pub fn prepare_outbound<P: Payload>(&self, msg: &mut P) -> Result<Vec<String>> {
        if self.should_compress(msg) {
            compress(msg)?;
        }
        if msg.data_encoding() != Some(GZIP) {
            return Ok(Vec::new());
        }
        match msg.data() {
            Value::String(encoded) => Ok(calc_chunks(encoded, self.chunk_size)),
            _ => Ok(Vec::new()),
        }
    }
}

/// Replace `data` with its compressed, base64-encoded form and set `dataEncoding`.
pub fn compress<P: Payload>(msg: &mut P) -> Result<()> {
    let encoded = compress_value(msg.data())?;
    *msg.data_mut() = Value::String(encoded);
    msg.set_data_encoding(Some(GZIP.to_string()));
    Ok(())
}

/// Deflate + base64 of the JSON form of `data`.
pub fn compress_value(data: &Value) -> Result<String> {
    let json = serde_json::to_vec(data).map_err(|e| BusError::Codec(format!("serialize: {e}")))?;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| BusError::Codec(format!("deflate: {e}")))?;
    let deflated = encoder
        .finish()
        .map_err(|e| BusError::Codec(format!("deflate: {e}")))?;

    let encoded = STANDARD.encode(deflated);
    tracing::debug!(raw = json.len(), encoded = encoded.len(), "compressed payload");
    Ok(encoded)
}

/// Inverse of [`compress_value`].
pub fn decompress(encoded: &str) -> Result<Value> {
    let deflated = STANDARD
        .decode(encoded)
        .map_err(|e| BusError::Codec(format!("base64: {e}")))?;

    let mut json = Vec::new();
    ZlibDecoder::new(deflated.as_slice())
        .read_to_end(&mut json)
        .map_err(|e| BusError::Codec(format!("inflate: {e}")))?;

    serde_json::from_slice(&json).map_err(|e| BusError::Codec(format!("deserialize: {e}")))
}

/// Split `s` into contiguous pieces of at most `chunk_size` chars.
///
/// Returns an empty list when no chunking is needed.
pub fn calc_chunks(s: &str, chunk_size: usize) -> Vec<String> {
    let len = s.chars().count();
    if chunk_size == 0 || len <= chunk_size {
        return Vec::new();
    }

    let mut chunks = Vec::with_capacity(len.div_ceil(chunk_size));
    let mut current = String::with_capacity(chunk_size);
    let mut in_current = 0;
    for c in s.chars() {
        current.push(c);
        in_current += 1;
        if in_current == chunk_size {
            chunks.push(std::mem::take(&mut current));
            in_current = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Receiver-side reassembly of a chunked payload.
///
/// Slots start empty and a payload is complete once every slot is non-empty,
/// so an empty chunk is indistinguishable from one not yet received.
#[derive(Debug, Clone)]
pub struct ChunkBuffer {
    slots: Vec<String>,
}

impl ChunkBuffer {
    /// `total` comes off the wire, so it is checked before anything is allocated.
    pub fn new(total: u32, max_chunks: u32) -> Result<Self> {
        if total == 0 {
            return Err(BusError::Codec("chunk count must be greater than 0".into()));
        }
        if total > max_chunks {
            return Err(BusError::Codec(format!(
                "{total} chunks exceeds the limit of {max_chunks}"
            )));
        }
        Ok(Self {
            slots: vec![String::new(); total as usize],
        })
    }

    pub fn total(&self) -> usize {
        self.slots.len()
    }

    /// Store chunk `index`; out-of-range indexes are rejected.
    pub fn insert(&mut self, index: u32, data: String) -> Result<()> {
        let total = self.slots.len();
        let slot = self.slots.get_mut(index as usize).ok_or_else(|| {
            BusError::Codec(format!("invalid chunk {index}, expected {total} chunks"))
        })?;
        *slot = data;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(|s| !s.is_empty())
    }

    /// Concatenate all slots in index order.
    pub fn join(&self) -> String {
        self.slots.concat()
    }
}
