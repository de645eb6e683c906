//! JSON schemas for request/response validation.
//!
//! Schemas come from `*.json` files in the schemas dir or inline on a
//! subscription (keyed by content hash).

mod formats;
pub mod gateway;
pub mod validator;

pub use gateway::{hash_schema, SchemaGateway, ValidationTarget};
pub use validator::{JsonSchemaValidator, SchemaValidator, ValidationFailure};
