//! Bus config loader (strict parsing).

pub mod schema;

use std::fs;
use std::path::Path;

use relaybus_core::error::{BusError, Result};

pub use schema::{derive_instance_id, BusConfig, ConnectOptions};

pub fn load_from_file(path: impl AsRef<Path>) -> Result<BusConfig> {
    let path = path.as_ref();
    let s = fs::read_to_string(path)
        .map_err(|e| BusError::Config(format!("read config {} failed: {e}", path.display())))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<BusConfig> {
    let cfg: BusConfig =
        serde_yaml::from_str(s).map_err(|e| BusError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
