//! Error catalog: named error models that services turn into error envelopes.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{BusError, ErrorCode, Result};
use crate::protocol::envelope::BusResponse;

/// Definition of one error a service may return.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorModel {
    pub status: u16,
    pub code: String,
    pub title: String,
    /// Fallback detail when none is given at the call site.
    #[serde(default)]
    pub detail: Option<String>,
}

impl ErrorModel {
    pub fn new(status: u16, code: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            title: title.into(),
            detail: None,
        }
    }
}

impl From<ErrorCode> for ErrorModel {
    fn from(code: ErrorCode) -> Self {
        Self::new(code.status(), code.as_str(), code.title())
    }
}

/// Registry of error models keyed by code.
///
/// Always contains the bus codes (`BAD_REQUEST`, `NOT_FOUND`, ...) in addition
/// to the custom models given at construction.
#[derive(Debug, Clone)]
pub struct ErrorCatalog {
    models: HashMap<String, ErrorModel>,
}

impl Default for ErrorCatalog {
    fn default() -> Self {
        let models = ErrorCode::ALL
            .iter()
            .map(|c| (c.as_str().to_string(), ErrorModel::from(*c)))
            .collect();
        Self { models }
    }
}

impl ErrorCatalog {
    /// Build a catalog from custom models; a duplicate custom code is fatal.
    /// Custom models may override a default code.
    pub fn new(custom: Vec<ErrorModel>) -> Result<Self> {
        let mut catalog = Self::default();
        let mut seen = Vec::with_capacity(custom.len());
        for model in custom {
            if seen.contains(&model.code) {
                return Err(BusError::Config(format!(
                    "error {} already defined, duplicate entry",
                    model.code
                )));
            }
            seen.push(model.code.clone());
            catalog.models.insert(model.code.clone(), model);
        }
        Ok(catalog)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.models.contains_key(code)
    }

    /// Build a fresh error envelope (new `error.id`) for `code`.
    pub fn get(&self, code: &str, detail: Option<String>) -> Result<BusResponse> {
        let model = self
            .models
            .get(code)
            .ok_or_else(|| BusError::Config(format!("error {code} not defined")))?;

        Ok(BusResponse::custom_error(
            model.status,
            model.code.clone(),
            model.title.clone(),
            detail.or_else(|| model.detail.clone()),
        ))
    }

    pub fn not_found(&self, detail: impl Into<String>) -> Result<BusResponse> {
        self.get(ErrorCode::NotFound.as_str(), Some(detail.into()))
    }

    pub fn bad_request(&self, detail: impl Into<String>) -> Result<BusResponse> {
        self.get(ErrorCode::BadRequest.as_str(), Some(detail.into()))
    }

    pub fn forbidden(&self, detail: impl Into<String>) -> Result<BusResponse> {
        self.get(ErrorCode::Forbidden.as_str(), Some(detail.into()))
    }
}
