use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError};

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use relaybus_core::error::{BusError, Result};
use relaybus_core::{BusResponse, ErrorCode};

use super::validator::{JsonSchemaValidator, SchemaValidator, ValidationFailure};

/// Which side of a call is being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationTarget {
    Request,
    Response,
}

/// Schema store of one bus instance.
///
/// Keeps the schemas it added (for the metadata reply) and forwards
/// validation to the engine.
pub struct SchemaGateway {
    validator: Arc<dyn SchemaValidator>,
    loaded: RwLock<Vec<Value>>,
    disable_cache: bool,
}

impl SchemaGateway {
    pub fn new(disable_cache: bool) -> Self {
        Self::with_validator(Arc::new(JsonSchemaValidator::new()), disable_cache)
    }

    pub fn with_validator(validator: Arc<dyn SchemaValidator>, disable_cache: bool) -> Self {
        Self {
            validator,
            loaded: RwLock::new(Vec::new()),
            disable_cache,
        }
    }

    /// Load every `*.json` file of `dir`.
    ///
    /// With the cache enabled a populated gateway is left untouched; a missing
    /// directory simply means no file schemas.
    pub fn init(&self, dir: impl AsRef<Path>) -> Result<()> {
        if !self.read().is_empty() && !self.disable_cache {
            tracing::debug!("schemas already loaded, keeping cache");
            return Ok(());
        }
        self.clear();

        let dir = dir.as_ref();
        if !dir.is_dir() {
            tracing::debug!(dir = %dir.display(), "no schemas dir, skipping schema load");
            return Ok(());
        }

        let entries = fs::read_dir(dir)
            .map_err(|e| BusError::Schema(format!("read schemas dir {}: {e}", dir.display())))?;
        let mut files: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        for file in files {
            let raw = fs::read_to_string(&file)
                .map_err(|e| BusError::Schema(format!("read {}: {e}", file.display())))?;
            let schema: Value = serde_json::from_str(&raw)
                .map_err(|e| BusError::Schema(format!("invalid schema {}: {e}", file.display())))?;
            self.add_schema(schema)?;
        }

        tracing::info!(count = self.read().len(), dir = %dir.display(), "loaded schemas");
        Ok(())
    }

    /// Add a named schema; returns its id, or `None` when it has none.
    ///
    /// A legacy `id` is migrated to `$id`. Already known ids are not re-added.
    pub fn add_schema(&self, mut schema: Value) -> Result<Option<String>> {
        let Some(obj) = schema.as_object_mut() else {
            return Err(BusError::Schema("schema must be a JSON object".into()));
        };

        if !obj.contains_key("$id") {
            if let Some(legacy) = obj.remove("id") {
                tracing::warn!(id = %legacy, "schema uses `id`, `$id` should be used");
                obj.insert("$id".into(), legacy);
            }
        }

        let Some(id) = obj.get("$id").and_then(Value::as_str).map(str::to_string) else {
            tracing::error!(schema = %schema, "missing $id for schema, cannot use it");
            return Ok(None);
        };

        if self.validator.get_schema(&id).is_some() {
            tracing::debug!(%id, "schema already exists in schema cache, will not add it again");
            return Ok(Some(id));
        }

        self.validator.add_schema(schema.clone())?;
        self.write().push(schema);
        tracing::debug!(%id, "added schema");
        Ok(Some(id))
    }

    /// Add an anonymous schema under the hash of its content.
    pub fn add_inline(&self, mut schema: Value) -> Result<String> {
        let Some(obj) = schema.as_object_mut() else {
            return Err(BusError::Schema("inline schema must be a JSON object".into()));
        };
        obj.remove("id");
        obj.remove("$id");
        let id = hash_schema(&schema);
        if let Some(obj) = schema.as_object_mut() {
            obj.insert("$id".into(), Value::String(id.clone()));
        }
        self.add_schema(schema)?;
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<Value> {
        self.validator.get_schema(id)
    }

    /// Schemas added through this gateway, in load order.
    pub fn all(&self) -> Vec<Value> {
        self.read().clone()
    }

    /// Validate `value` against schema `id`.
    ///
    /// The error is the reply to send: `BAD_REQUEST`/`BAD_RESPONSE` for an
    /// invalid value, `INTERNAL_SERVER_ERROR` for a missing or broken schema.
    /// A missing body (`null`) is validated as `{}`.
    pub fn validate(
        &self,
        id: &str,
        value: &Value,
        target: ValidationTarget,
    ) -> std::result::Result<(), BusResponse> {
        let empty = Value::Object(Map::new());
        let value = if value.is_null() { &empty } else { value };
        match self.validator.validate(id, value) {
            Ok(()) => Ok(()),
            Err(ValidationFailure::Invalid(detail)) => {
                let code = match target {
                    ValidationTarget::Request => ErrorCode::BadRequest,
                    ValidationTarget::Response => ErrorCode::BadResponse,
                };
                Err(BusResponse::error(code, detail))
            }
            Err(ValidationFailure::Schema(detail)) => {
                tracing::error!(schema = id, %detail, "failed validating, schema is missing or malformed");
                Err(BusResponse::internal_server_error(detail))
            }
        }
    }

    fn clear(&self) {
        let mut loaded = self.write();
        for schema in loaded.drain(..) {
            if let Some(id) = schema.get("$id").and_then(Value::as_str) {
                self.validator.remove_schema(id);
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Value>> {
        self.loaded.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Value>> {
        self.loaded.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hex sha256 of the schema's JSON, ignoring `id`/`$id`.
pub fn hash_schema(schema: &Value) -> String {
    let mut canonical = schema.clone();
    if let Some(obj) = canonical.as_object_mut() {
        obj.remove("id");
        obj.remove("$id");
    }
    let json = serde_json::to_string(&canonical).unwrap_or_default();
    hex::encode(Sha256::digest(json.as_bytes()))
}
