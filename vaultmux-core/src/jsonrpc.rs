//! JSON-RPC 2.0 identifiers and message classification.
//!
//! Classification operates on an already-parsed `serde_json::Value` and is
//! determined purely by the presence or absence of `id` and `method`. The
//! multiplexer never looks deeper into a message than this, except for the
//! handful of lifecycle methods it answers locally.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Request Identifier
// ─────────────────────────────────────────────────────────────────────────────

/// A JSON-RPC request identifier.
///
/// The id type (string or integer) must be echoed back unchanged, so the
/// original representation is preserved. An explicit `null` id is distinct
/// from a missing `id` field, which marks a notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JsonRpcId {
    /// Integer ID (e.g., `"id": 1`)
    Number(i64),
    /// String ID (e.g., `"id": "abc-123"`)
    String(String),
    /// Explicit null ID (e.g., `"id": null`) - valid but unusual
    Null,
}

impl JsonRpcId {
    /// Convert to the JSON value placed in a message's `id` field.
    pub fn to_value(&self) -> Value {
        match self {
            JsonRpcId::Number(n) => Value::from(*n),
            JsonRpcId::String(s) => Value::String(s.clone()),
            JsonRpcId::Null => Value::Null,
        }
    }
}

/// Renders the id as it appears on the wire: `1`, `"abc"`, or `null`.
///
/// Strings keep their quotes so that `1` and `"1"` never render the same.
impl fmt::Display for JsonRpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonRpcId::Number(n) => write!(f, "{n}"),
            JsonRpcId::String(s) => write!(f, "{}", Value::String(s.clone())),
            JsonRpcId::Null => f.write_str("null"),
        }
    }
}

impl Serialize for JsonRpcId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            JsonRpcId::Number(n) => serializer.serialize_i64(*n),
            JsonRpcId::String(s) => serializer.serialize_str(s),
            JsonRpcId::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        parse_id(&value).map_err(|()| {
            serde::de::Error::custom("JSON-RPC ID must be string, integer, or null")
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Classification
// ─────────────────────────────────────────────────────────────────────────────

/// JSON-RPC 2.0 message classification.
///
/// - Request: has both `id` and `method`
/// - Response: has `id` but no `method`
/// - Notification: has `method` but no `id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonRpcMessageKind {
    /// Has both `id` and `method`: a request expecting a response.
    Request { id: JsonRpcId, method: String },
    /// Has `id` but no `method`: a response to a previous request.
    Response { id: JsonRpcId },
    /// Has `method` but no `id`: a fire-and-forget notification.
    Notification { method: String },
}

impl JsonRpcMessageKind {
    /// The identifier, for requests and responses.
    pub fn id(&self) -> Option<&JsonRpcId> {
        match self {
            JsonRpcMessageKind::Request { id, .. } | JsonRpcMessageKind::Response { id } => {
                Some(id)
            }
            JsonRpcMessageKind::Notification { .. } => None,
        }
    }

    /// The method name, for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            JsonRpcMessageKind::Request { method, .. }
            | JsonRpcMessageKind::Notification { method } => Some(method.as_str()),
            JsonRpcMessageKind::Response { .. } => None,
        }
    }

    /// Short label for log fields.
    pub fn label(&self) -> &'static str {
        match self {
            JsonRpcMessageKind::Request { .. } => "request",
            JsonRpcMessageKind::Response { .. } => "response",
            JsonRpcMessageKind::Notification { .. } => "notification",
        }
    }
}

/// Classify a parsed JSON-RPC value without taking ownership.
///
/// Validates the `"jsonrpc": "2.0"` version field, then classifies based on
/// the presence of `id` and `method` fields.
///
/// # Errors
///
/// Returns `JsonRpcClassifyError` if:
/// - The `jsonrpc` field is missing or not `"2.0"` (`InvalidVersion`)
/// - The `id` field is present but not a valid JSON-RPC ID (`InvalidId`)
/// - Neither `id` nor `method` is present (`Unclassifiable`)
pub fn classify_jsonrpc(value: &Value) -> Result<JsonRpcMessageKind, JsonRpcClassifyError> {
    let version = value.get("jsonrpc").and_then(|v| v.as_str());
    if version != Some("2.0") {
        return Err(JsonRpcClassifyError::InvalidVersion);
    }

    let id = value
        .get("id")
        .map(parse_id)
        .transpose()
        .map_err(|()| JsonRpcClassifyError::InvalidId)?;
    let method = value
        .get("method")
        .and_then(|v| v.as_str())
        .map(String::from);

    match (id, method) {
        (Some(id), Some(method)) => Ok(JsonRpcMessageKind::Request { id, method }),
        (Some(id), None) => Ok(JsonRpcMessageKind::Response { id }),
        (None, Some(method)) => Ok(JsonRpcMessageKind::Notification { method }),
        (None, None) => Err(JsonRpcClassifyError::Unclassifiable),
    }
}

/// Accepts string, integer, or null. Rejects floats, booleans, arrays, objects.
fn parse_id(value: &Value) -> Result<JsonRpcId, ()> {
    match value {
        Value::Number(n) => n.as_i64().map(JsonRpcId::Number).ok_or(()),
        Value::String(s) => Ok(JsonRpcId::String(s.clone())),
        Value::Null => Ok(JsonRpcId::Null),
        _ => Err(()),
    }
}

/// Errors that can occur during JSON-RPC message classification.
#[derive(Debug, thiserror::Error)]
pub enum JsonRpcClassifyError {
    /// The `jsonrpc` field is missing or not `"2.0"`.
    #[error("missing or invalid jsonrpc version field")]
    InvalidVersion,
    /// The `id` field is present but not a valid JSON-RPC ID (string, integer, or null).
    #[error("invalid id field")]
    InvalidId,
    /// The message has neither `id` nor `method`, so it cannot be classified.
    #[error("message has neither id nor method")]
    Unclassifiable,
}
