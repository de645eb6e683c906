use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::policy::RequiredPermissions;

/// Schema given by id or inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaRef {
    Id(String),
    Inline(Value),
}

impl From<&str> for SchemaRef {
    fn from(id: &str) -> Self {
        SchemaRef::Id(id.to_string())
    }
}

impl From<String> for SchemaRef {
    fn from(id: String) -> Self {
        SchemaRef::Id(id)
    }
}

impl From<Value> for SchemaRef {
    fn from(schema: Value) -> Self {
        SchemaRef::Inline(schema)
    }
}

/// Endpoint documentation, surfaced through the metadata reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Docs {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub errors: BTreeMap<String, String>,
}

/// Options of one subscription.
///
/// Build with [`SubscriptionOptions::new`] or from a bare subject string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionOptions {
    /// May carry `:param` segments, e.g. `user-service.get.:userId`.
    pub subject: String,
    /// Compete with other instances in a queue group named after the subject.
    #[serde(default = "enabled")]
    pub create_queue_group: bool,
    #[serde(default)]
    pub must_be_logged_in: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<RequiredPermissions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_schema: Option<SchemaRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<SchemaRef>,
    #[serde(default = "enabled")]
    pub validate_request: bool,
    #[serde(default = "enabled")]
    pub validate_response: bool,
    #[serde(default)]
    pub docs: Docs,
    #[serde(default)]
    pub deprecated: bool,
}

fn enabled() -> bool {
    true
}

impl SubscriptionOptions {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            create_queue_group: true,
            must_be_logged_in: false,
            permissions: None,
            request_schema: None,
            response_schema: None,
            validate_request: true,
            validate_response: true,
            docs: Docs::default(),
            deprecated: false,
        }
    }

    /// Every instance receives every message.
    pub fn no_queue_group(mut self) -> Self {
        self.create_queue_group = false;
        self
    }

    pub fn must_be_logged_in(mut self) -> Self {
        self.must_be_logged_in = true;
        self
    }

    pub fn permissions(mut self, permissions: impl Into<RequiredPermissions>) -> Self {
        self.permissions = Some(permissions.into());
        self
    }

    pub fn request_schema(mut self, schema: impl Into<SchemaRef>) -> Self {
        self.request_schema = Some(schema.into());
        self
    }

    pub fn response_schema(mut self, schema: impl Into<SchemaRef>) -> Self {
        self.response_schema = Some(schema.into());
        self
    }

    pub fn skip_request_validation(mut self) -> Self {
        self.validate_request = false;
        self
    }

    pub fn skip_response_validation(mut self) -> Self {
        self.validate_response = false;
        self
    }

    pub fn docs(mut self, docs: Docs) -> Self {
        self.docs = docs;
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    /// Queue group name: the lower-cased subject.
    pub fn queue_group(&self) -> Option<String> {
        self.create_queue_group.then(|| self.subject.to_lowercase())
    }
}

impl From<&str> for SubscriptionOptions {
    fn from(subject: &str) -> Self {
        Self::new(subject)
    }
}

impl From<String> for SubscriptionOptions {
    fn from(subject: String) -> Self {
        Self::new(subject)
    }
}
