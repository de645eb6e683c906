//! Built-in services subscribed on every connection.

pub mod metadata;

pub use metadata::MetadataService;
