use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use relaybus_core::error::{BusError, Result};
use relaybus_core::protocol::codec::{CodecPolicy, CompressionStrategy, DEFAULT_MAX_CHUNKS};

/// Runtime configuration of one bus instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Derived from `service_name` when left empty.
    #[serde(default)]
    pub instance_id: String,

    #[serde(default = "default_size_limit")]
    pub compress_threshold: usize,

    #[serde(default = "default_size_limit")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_timeout_ms")]
    pub chunk_timeout_ms: u64,

    /// Largest chunk count accepted from a peer before any buffer is allocated.
    #[serde(default = "default_max_chunks")]
    pub max_chunks: u32,

    #[serde(default)]
    pub compression_strategy: CompressionStrategy,

    #[serde(default)]
    pub disable_schema_cache: bool,

    #[serde(default = "default_schemas_dir")]
    pub schemas_dir: String,

    #[serde(default = "default_source_version")]
    pub source_version: String,

    /// Safety unsubscribe of a request's data-reply subscription.
    #[serde(default = "default_data_reply_grace_ms")]
    pub data_reply_grace_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            instance_id: String::new(),
            compress_threshold: default_size_limit(),
            chunk_size: default_size_limit(),
            chunk_timeout_ms: default_chunk_timeout_ms(),
            max_chunks: default_max_chunks(),
            compression_strategy: CompressionStrategy::default(),
            disable_schema_cache: false,
            schemas_dir: default_schemas_dir(),
            source_version: default_source_version(),
            data_reply_grace_ms: default_data_reply_grace_ms(),
        }
    }
}

impl BusConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(BusError::Config("chunk_size must be greater than 0".into()));
        }
        if self.compress_threshold > self.chunk_size {
            return Err(BusError::Config(format!(
                "compress_threshold must be less than or equal chunk_size, current values are {} and {}",
                self.compress_threshold, self.chunk_size
            )));
        }
        if self.chunk_timeout_ms == 0 {
            return Err(BusError::Config("chunk_timeout_ms must be greater than 0".into()));
        }
        if self.max_chunks == 0 {
            return Err(BusError::Config("max_chunks must be greater than 0".into()));
        }
        if self.service_name.trim().is_empty() {
            return Err(BusError::Config("service_name must not be empty".into()));
        }
        Ok(())
    }

    /// Override fields from process environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Override fields from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SERVICE_NAME") {
            self.service_name = v;
        }
        if let Some(v) = lookup("COMPRESS_THRESHOLD") {
            self.compress_threshold = parse_env("COMPRESS_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("CHUNK_SIZE") {
            self.chunk_size = parse_env("CHUNK_SIZE", &v)?;
        }
        if let Some(v) = lookup("CHUNK_TIMEOUT_MS") {
            self.chunk_timeout_ms = parse_env("CHUNK_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("MAX_CHUNKS") {
            self.max_chunks = parse_env("MAX_CHUNKS", &v)?;
        }
        if let Some(v) = lookup("COMPRESSION_STRATEGY") {
            self.compression_strategy = match v.to_ascii_lowercase().as_str() {
                "auto" => CompressionStrategy::Auto,
                "manual" => CompressionStrategy::Manual,
                other => {
                    return Err(BusError::Config(format!(
                        "COMPRESSION_STRATEGY must be auto or manual, got {other}"
                    )))
                }
            };
        }
        if let Some(v) = lookup("DISABLE_SCHEMA_CACHE") {
            self.disable_schema_cache = v == "true";
        }
        if let Some(v) = lookup("SCHEMAS_PATH") {
            self.schemas_dir = v;
        }
        if let Some(v) = lookup("SOURCE_VERSION") {
            self.source_version = v;
        }
        Ok(())
    }

    /// Instance id as configured, or derived as `<service>.<8 hex>`.
    pub fn resolved_instance_id(&self) -> String {
        if self.instance_id.is_empty() {
            derive_instance_id(&self.service_name)
        } else {
            self.instance_id.clone()
        }
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    /// How long a requester keeps its data subject open after the reply.
    pub fn data_reply_grace(&self) -> Duration {
        Duration::from_millis(self.data_reply_grace_ms)
    }

    pub fn codec_policy(&self) -> CodecPolicy {
        CodecPolicy {
            strategy: self.compression_strategy,
            compress_threshold: self.compress_threshold,
            chunk_size: self.chunk_size,
            max_chunks: self.max_chunks,
        }
    }
}

pub fn derive_instance_id(service_name: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{service_name}.{}", &id[..8])
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BusError::Config(format!("{key} must be a number, got {value}")))
}

fn default_service_name() -> String {
    "n/a".into()
}
fn default_size_limit() -> usize {
    1024 * 900
}
fn default_chunk_timeout_ms() -> u64 {
    5000
}
fn default_max_chunks() -> u32 {
    DEFAULT_MAX_CHUNKS
}
fn default_schemas_dir() -> String {
    "lib/schemas".into()
}
fn default_source_version() -> String {
    "n/a".into()
}
fn default_data_reply_grace_ms() -> u64 {
    60_000
}

/// Where and how to connect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    pub addresses: Vec<String>,
    /// Later `connect` calls reuse this client.
    pub singleton: bool,
    /// Overrides `BusConfig::schemas_dir`.
    pub schemas_dir: Option<String>,
}

impl ConnectOptions {
    pub fn new(addresses: impl Into<ConnectOptions>) -> Self {
        addresses.into()
    }

    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    pub fn schemas_dir(mut self, dir: impl Into<String>) -> Self {
        self.schemas_dir = Some(dir.into());
        self
    }

    /// Addresses that select the in-process transport.
    pub fn is_mock(&self) -> bool {
        self.addresses.iter().any(|a| a.contains("mock"))
    }
}

impl From<&str> for ConnectOptions {
    fn from(address: &str) -> Self {
        Self {
            addresses: vec![address.to_string()],
            ..Self::default()
        }
    }
}

impl From<String> for ConnectOptions {
    fn from(address: String) -> Self {
        Self {
            addresses: vec![address],
            ..Self::default()
        }
    }
}

impl From<Vec<String>> for ConnectOptions {
    fn from(addresses: Vec<String>) -> Self {
        Self {
            addresses,
            ..Self::default()
        }
    }
}
