//! Bus message envelopes (JSON).
//!
//! Requests and responses share the same wire shape: correlation ids, a `data`
//! payload and the compression/chunking markers. `data` stays a
//! `serde_json::Value` so it can be swapped for its compressed form (or the `{}`
//! placeholder of a chunked message) without knowing the payload type.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{BusError, ErrorCode, Result};

/// String map used for query, params and headers.
pub type StringMap = BTreeMap<String, String>;

/// Sender stamp set on every outbound envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    pub service: String,
    pub instance_id: String,
}

/// Caller identity used for permission checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Any other profile fields, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    pub fn new(id: impl Into<String>, scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            id: id.into(),
            scopes: scopes.into_iter().map(Into::into).collect(),
            extra: Map::new(),
        }
    }
}

/// Request envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusRequest {
    /// Correlates a whole causal chain of calls; propagated across hops.
    #[serde(default)]
    pub req_id: String,
    /// Correlates exactly one request with its response.
    #[serde(default)]
    pub transaction_id: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default)]
    pub query: StringMap,
    #[serde(default)]
    pub params: StringMap,
    #[serde(default)]
    pub headers: StringMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_encoding: Option<String>,
    /// Total chunk count when `data` is delivered separately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<u32>,
    /// Subject the other side should publish remaining chunks to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Origin>,
}

impl BusRequest {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn with_req_id(mut self, req_id: impl Into<String>) -> Self {
        self.req_id = req_id.into();
        self
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Request gzip compression of `data` regardless of size.
    pub fn gzip(mut self) -> Self {
        self.data_encoding = Some(crate::protocol::codec::GZIP.to_string());
        self
    }

    /// Scopes of the caller; empty for anonymous callers.
    pub fn scopes(&self) -> &[String] {
        self.user.as_ref().map(|u| u.scopes.as_slice()).unwrap_or(&[])
    }

    /// Deserialize `data` into a concrete type.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| BusError::Codec(format!("request data: {e}")))
    }
}

/// Error details of an error-shaped response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Service that produced the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thrower: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ErrorBody {
    /// `error: {}` on the wire is not an error.
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.code.is_empty()
            && self.title.is_empty()
            && self.detail.is_none()
            && self.thrower.is_none()
            && self.extra.is_empty()
    }
}

/// Response envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusResponse {
    #[serde(default)]
    pub req_id: String,
    #[serde(default)]
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub status: u16,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    /// Handler latency in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ms: Option<u64>,
    #[serde(default, skip_serializing_if = "StringMap::is_empty")]
    pub headers: StringMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Origin>,
}

fn is_zero(v: &u16) -> bool {
    *v == 0
}

impl BusResponse {
    /// Successful response with status 200.
    pub fn ok(data: Value) -> Self {
        Self::with_status(200, data)
    }

    pub fn with_status(status: u16, data: Value) -> Self {
        Self {
            status,
            data,
            ..Self::default()
        }
    }

    /// Error-shaped response for a bus error code, with a fresh error id.
    pub fn error(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self::custom_error(code.status(), code.as_str(), code.title(), Some(detail.into()))
    }

    /// Error-shaped response for an arbitrary (catalog or business) code.
    pub fn custom_error(
        status: u16,
        code: impl Into<String>,
        title: impl Into<String>,
        detail: Option<String>,
    ) -> Self {
        Self {
            status,
            error: Some(ErrorBody {
                id: Some(Uuid::new_v4().to_string()),
                code: code.into(),
                title: title.into(),
                detail,
                ..ErrorBody::default()
            }),
            ..Self::default()
        }
    }

    pub fn internal_server_error(detail: impl Into<String>) -> Self {
        Self::error(ErrorCode::InternalServerError, detail)
    }

    /// A response is erroneous iff `status >= 400` or `error` is a non-empty object.
    pub fn is_error(&self) -> bool {
        self.status >= 400 || self.error.as_ref().is_some_and(|e| !e.is_empty())
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error
            .as_ref()
            .map(|e| e.code.as_str())
            .filter(|c| !c.is_empty())
    }

    /// Set the error thrower unless one is already present.
    pub fn stamp_thrower(&mut self, service: &str) {
        if let Some(err) = self.error.as_mut() {
            if err.thrower.is_none() {
                err.thrower = Some(service.to_string());
            }
        }
    }

    /// Give the error a fresh id unless one is already present.
    pub fn ensure_error_id(&mut self) {
        if let Some(err) = self.error.as_mut() {
            if err.id.is_none() {
                err.id = Some(Uuid::new_v4().to_string());
            }
        }
    }

    /// Deserialize `data` into a concrete type.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| BusError::Codec(format!("response data: {e}")))
    }
}

/// Single-line rendering: `<status> <code>: <detail>`.
impl fmt::Display for BusResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        if let Some(code) = self.error_code() {
            write!(f, " {code}")?;
        }
        if let Some(detail) = self.error.as_ref().and_then(|e| e.detail.as_deref()) {
            write!(f, ": {}", detail.replace('\n', " "))?;
        }
        Ok(())
    }
}

/// One piece of a chunked payload, published to a data subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataMessage {
    #[serde(default)]
    pub req_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub transaction_id: String,
    #[serde(default)]
    pub data: String,
    pub chunk: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<u32>,
}

/// Envelopes carrying a compressible `data` payload.
pub trait Payload {
    fn data(&self) -> &Value;
    fn data_mut(&mut self) -> &mut Value;
    fn data_encoding(&self) -> Option<&str>;
    fn set_data_encoding(&mut self, encoding: Option<String>);
    fn set_chunks(&mut self, chunks: Option<u32>);
}

macro_rules! impl_payload {
    ($ty:ty) => {
        impl Payload for $ty {
            fn data(&self) -> &Value {
                &self.data
            }
            fn data_mut(&mut self) -> &mut Value {
                &mut self.data
            }
            fn data_encoding(&self) -> Option<&str> {
                self.data_encoding.as_deref()
            }
            fn set_data_encoding(&mut self, encoding: Option<String>) {
                self.data_encoding = encoding;
            }
            fn set_chunks(&mut self, chunks: Option<u32>) {
                self.chunks = chunks;
            }
        }
    };
}

impl_payload!(BusRequest);
impl_payload!(BusResponse);
