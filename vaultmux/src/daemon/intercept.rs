//! Per-client lifecycle methods answered or dropped locally.
//!
//! The upstream session belongs to the daemon. Client handshake and teardown
//! chatter never reaches it:
//!
//! | Method                      | Action                                   |
//! |-----------------------------|------------------------------------------|
//! | `initialize`                | answer from the [`HandshakeCache`]       |
//! | `notifications/initialized` | swallow                                  |
//! | `shutdown`                  | answer with a `null` result              |
//! | `exit`                      | swallow (does not stop the daemon)       |
//!
//! A table method that arrives with an id is always answered, so a client
//! that sends `exit` as a request still gets a reply instead of hanging.

use serde_json::Value;
use vaultmux_core::{FramedMessage, JsonRpcMessageKind};

use super::upstream::HandshakeCache;

const METHOD_INITIALIZE: &str = "initialize";
const METHOD_INITIALIZED: &str = "notifications/initialized";
const METHOD_SHUTDOWN: &str = "shutdown";
const METHOD_EXIT: &str = "exit";

/// Outcome of running a client message through the interception table.
#[derive(Debug, Clone, PartialEq)]
pub enum Interception {
    /// Send this response back to the client; nothing goes upstream.
    Reply(FramedMessage),
    /// Drop the message.
    Swallow,
    /// Not a lifecycle method; route it upstream.
    Forward(FramedMessage),
}

/// Whether `method` is handled locally.
pub fn is_lifecycle_method(method: &str) -> bool {
    matches!(
        method,
        METHOD_INITIALIZE | METHOD_INITIALIZED | METHOD_SHUTDOWN | METHOD_EXIT
    )
}

/// Decide what to do with a message from a client.
pub fn intercept(message: FramedMessage, cache: &HandshakeCache) -> Interception {
    let (id, method) = match message.kind() {
        JsonRpcMessageKind::Request { id, method } => (Some(id), method.as_str()),
        JsonRpcMessageKind::Notification { method } => (None, method.as_str()),
        JsonRpcMessageKind::Response { .. } => return Interception::Forward(message),
    };

    if !is_lifecycle_method(method) {
        return Interception::Forward(message);
    }

    let Some(id) = id else {
        tracing::debug!(method, "swallowing client lifecycle notification");
        return Interception::Swallow;
    };

    let result = if method == METHOD_INITIALIZE {
        cache.result().clone()
    } else {
        Value::Null
    };
    tracing::debug!(method, id = %id, "answering client lifecycle request locally");
    Interception::Reply(FramedMessage::response(id.clone(), result))
}
