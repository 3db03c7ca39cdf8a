//! Encode/decode of the opaque `Content` and `Meta` fields.
//!
//! The embedded backend stores them as JSON text, the client/server backend
//! as JSONB values. Storage never looks inside either.

use serde_json::Value;

use crate::error::StoreResult;
use crate::types::{Content, Meta, MetaValue};

/// Serialize content to JSON text.
pub fn content_to_text(content: Option<&Content>) -> StoreResult<Option<String>> {
    Ok(content.map(serde_json::to_string).transpose()?)
}

/// Serialize metadata to JSON text.
pub fn meta_to_text(meta: Option<&Meta>) -> StoreResult<Option<String>> {
    Ok(meta.map(serde_json::to_string).transpose()?)
}

/// Parse content from JSON text.
pub fn content_from_text(text: Option<&str>) -> StoreResult<Option<Content>> {
    Ok(text.map(serde_json::from_str).transpose()?)
}

/// Parse metadata from JSON text.
pub fn meta_from_text(text: Option<&str>) -> StoreResult<Option<Meta>> {
    Ok(text.map(serde_json::from_str).transpose()?)
}

/// Content as a JSON value.
pub fn content_to_json(content: Option<&Content>) -> StoreResult<Option<Value>> {
    Ok(content.map(serde_json::to_value).transpose()?)
}

/// Metadata as a JSON value.
pub fn meta_to_json(meta: Option<&Meta>) -> StoreResult<Option<Value>> {
    Ok(meta.map(serde_json::to_value).transpose()?)
}

/// Content from a JSON value.
pub fn content_from_json(value: Option<Value>) -> StoreResult<Option<Content>> {
    Ok(value.map(serde_json::from_value).transpose()?)
}

/// Metadata from a JSON value.
pub fn meta_from_json(value: Option<Value>) -> StoreResult<Option<Meta>> {
    Ok(value.map(serde_json::from_value).transpose()?)
}

/// `{key: value}`, the containment probe for a metadata lookup.
pub fn meta_probe(key: &str, value: &MetaValue) -> Value {
    let mut probe = serde_json::Map::with_capacity(1);
    probe.insert(key.to_string(), value.to_json());
    Value::Object(probe)
}

/// SQLite JSON path selecting a top-level key, quoted so any key is safe.
pub fn sqlite_json_path(key: &str) -> String {
    format!("$.\"{}\"", key.replace('\\', "\\\\").replace('"', "\\\""))
}
