//! NDJSON framing for JSON-RPC over local sockets.
//!
//! One JSON-RPC message per line, UTF-8, newline-terminated. This module
//! provides the bounded line reader and the pure parsing step; the daemon's
//! per-connection read loops call [`bounded_read_line`] followed by
//! [`FramedMessage::decode`] for each line.

use serde_json::{Map, Value};
use tokio::io::AsyncBufReadExt;

use crate::error::FramingError;
use crate::jsonrpc::{JsonRpcClassifyError, JsonRpcId, JsonRpcMessageKind, classify_jsonrpc};

/// Maximum NDJSON message size (10 MB).
///
/// Lines exceeding this limit are rejected before JSON parsing so a peer
/// cannot make the daemon buffer unbounded input.
pub const MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// FramedMessage
// ─────────────────────────────────────────────────────────────────────────────

/// A parsed NDJSON line.
///
/// Holds the classified kind alongside the complete JSON object so that
/// rewriting the identifier leaves every other field (params, result, error,
/// `_meta`, unknown extensions) untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct FramedMessage {
    kind: JsonRpcMessageKind,
    body: Map<String, Value>,
}

impl FramedMessage {
    /// Decode one raw line (as read from the socket, newline included).
    ///
    /// # Errors
    ///
    /// `MalformedJson` for invalid UTF-8, plus everything
    /// [`parse_ndjson_message`] rejects.
    pub fn decode(raw: &[u8]) -> Result<Self, FramingError> {
        let line = std::str::from_utf8(raw).map_err(|e| FramingError::MalformedJson {
            reason: format!("invalid UTF-8: {e}"),
        })?;
        parse_ndjson_message(line)
    }

    /// Build a request message.
    pub fn request(id: JsonRpcId, method: impl Into<String>, params: Option<Value>) -> Self {
        let method = method.into();
        let mut body = envelope();
        body.insert("id".to_string(), id.to_value());
        body.insert("method".to_string(), Value::String(method.clone()));
        if let Some(params) = params {
            body.insert("params".to_string(), params);
        }
        Self {
            kind: JsonRpcMessageKind::Request { id, method },
            body,
        }
    }

    /// Build a notification message.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        let method = method.into();
        let mut body = envelope();
        body.insert("method".to_string(), Value::String(method.clone()));
        if let Some(params) = params {
            body.insert("params".to_string(), params);
        }
        Self {
            kind: JsonRpcMessageKind::Notification { method },
            body,
        }
    }

    /// Build a successful response carrying `result` (which may be `null`).
    pub fn response(id: JsonRpcId, result: Value) -> Self {
        let mut body = envelope();
        body.insert("id".to_string(), id.to_value());
        body.insert("result".to_string(), result);
        Self {
            kind: JsonRpcMessageKind::Response { id },
            body,
        }
    }

    pub fn kind(&self) -> &JsonRpcMessageKind {
        &self.kind
    }

    pub fn id(&self) -> Option<&JsonRpcId> {
        self.kind.id()
    }

    pub fn method(&self) -> Option<&str> {
        self.kind.method()
    }

    /// The `result` member of a response, if present.
    pub fn result(&self) -> Option<&Value> {
        self.body.get("result")
    }

    /// The `error` member of a response, if present.
    pub fn error(&self) -> Option<&Value> {
        self.body.get("error")
    }

    /// Replace the identifier, keeping every other field.
    ///
    /// Notifications have no identifier and are returned unchanged.
    #[must_use]
    pub fn with_id(mut self, new_id: JsonRpcId) -> Self {
        match &mut self.kind {
            JsonRpcMessageKind::Request { id, .. } | JsonRpcMessageKind::Response { id } => {
                self.body.insert("id".to_string(), new_id.to_value());
                *id = new_id;
            }
            JsonRpcMessageKind::Notification { .. } => {}
        }
        self
    }

    /// Serialize to a complete NDJSON line with trailing newline.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(&self.body).unwrap_or_else(|_| "{}".to_string());
        line.push('\n');
        line
    }
}

fn envelope() -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("jsonrpc".to_string(), Value::String("2.0".to_string()));
    body
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Parse a single NDJSON line into a [`FramedMessage`].
///
/// Performs size validation, JSON parsing, batch rejection, and JSON-RPC
/// classification in sequence.
///
/// # Errors
///
/// Returns [`FramingError`] for:
/// - Oversized messages (`MessageTooLarge`), checked before JSON parsing
/// - Empty lines, invalid JSON, non-object values (`MalformedJson`)
/// - JSON arrays (`UnsupportedBatch`)
/// - Missing `jsonrpc` field (`MissingVersion`)
/// - Wrong `jsonrpc` version (`UnsupportedVersion`)
/// - Invalid `id` type or neither `id` nor `method` (`MalformedJson`)
pub fn parse_ndjson_message(line: &str) -> Result<FramedMessage, FramingError> {
    if line.len() > MAX_MESSAGE_BYTES {
        return Err(FramingError::MessageTooLarge {
            max_bytes: MAX_MESSAGE_BYTES,
        });
    }

    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(FramingError::MalformedJson {
            reason: "empty message".to_string(),
        });
    }

    let value: Value = serde_json::from_str(trimmed).map_err(|e| FramingError::MalformedJson {
        reason: e.to_string(),
    })?;

    if value.is_array() {
        return Err(FramingError::UnsupportedBatch);
    }

    let kind = classify_jsonrpc(&value).map_err(|e| match e {
        JsonRpcClassifyError::InvalidVersion => match value.get("jsonrpc").and_then(|v| v.as_str())
        {
            Some(v) => FramingError::UnsupportedVersion {
                version: v.to_string(),
            },
            None => FramingError::MissingVersion,
        },
        JsonRpcClassifyError::InvalidId => FramingError::MalformedJson {
            reason: "invalid id field".to_string(),
        },
        JsonRpcClassifyError::Unclassifiable => FramingError::MalformedJson {
            reason: "message has neither id nor method".to_string(),
        },
    })?;

    // classify_jsonrpc only succeeds on objects carrying a version field.
    let Value::Object(body) = value else {
        return Err(FramingError::MalformedJson {
            reason: "message is not a JSON object".to_string(),
        });
    };

    Ok(FramedMessage { kind, body })
}

// ─────────────────────────────────────────────────────────────────────────────
// Bounded Line Reading
// ─────────────────────────────────────────────────────────────────────────────

/// Read a single line from an async buffered reader, enforcing a byte limit.
///
/// Unlike bare `read_line`, this will not allocate unbounded memory if the
/// peer sends a continuous stream of bytes without a newline. If the
/// accumulated bytes exceed `max_bytes` before a newline is found, the rest of
/// the line is drained and `FramingError::MessageTooLarge` is returned, leaving
/// the reader positioned at the start of the next line.
///
/// Raw bytes are accumulated into a `Vec<u8>` so multi-byte UTF-8 characters
/// straddling internal buffer boundaries are not corrupted.
///
/// # Returns
///
/// - `Ok(n)` where `n > 0`: a complete line (or the final unterminated line) was read into `buf`
/// - `Ok(0)`: EOF reached
/// - `Err(FramingError::MessageTooLarge)`: line exceeded `max_bytes`
/// - `Err(FramingError::Io)`: underlying I/O error
pub async fn bounded_read_line<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_bytes: usize,
) -> Result<usize, FramingError> {
    let mut total = 0usize;
    loop {
        let available = reader.fill_buf().await.map_err(FramingError::Io)?;

        if available.is_empty() {
            return Ok(total);
        }

        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let to_consume = pos + 1;
                if total + to_consume > max_bytes {
                    reader.consume(to_consume);
                    buf.clear();
                    return Err(FramingError::MessageTooLarge { max_bytes });
                }

                buf.extend_from_slice(&available[..to_consume]);
                total += to_consume;
                reader.consume(to_consume);
                return Ok(total);
            }
            None => {
                let len = available.len();
                if total + len > max_bytes {
                    reader.consume(len);
                    buf.clear();
                    drain_until_newline(reader).await?;
                    return Err(FramingError::MessageTooLarge { max_bytes });
                }

                buf.extend_from_slice(available);
                total += len;
                reader.consume(len);
            }
        }
    }
}

/// Skip the remainder of an oversized line, up to and including the newline.
async fn drain_until_newline<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<(), FramingError> {
    loop {
        let available = reader.fill_buf().await.map_err(FramingError::Io)?;
        if available.is_empty() {
            return Ok(());
        }
        if let Some(pos) = available.iter().position(|&b| b == b'\n') {
            reader.consume(pos + 1);
            return Ok(());
        }
        let len = available.len();
        reader.consume(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    // ─────────────────────────────────────────────────────────────────────
    // parse_ndjson_message
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn test_parse_request() {
        let line =
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"read_file"}}"#;
        let msg = parse_ndjson_message(line).unwrap();
        assert_eq!(
            msg.kind(),
            &JsonRpcMessageKind::Request {
                id: JsonRpcId::Number(1),
                method: "tools/call".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_error_response() {
        let line = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"bad"}}"#;
        let msg = parse_ndjson_message(line).unwrap();
        assert_eq!(msg.id(), Some(&JsonRpcId::Number(1)));
        assert_eq!(msg.error().unwrap()["code"], -32600);
        assert!(msg.result().is_none());
    }

    #[test]
    fn test_parse_malformed_json() {
        let err = parse_ndjson_message(r#"{"truncated"#).unwrap_err();
        assert!(matches!(err, FramingError::MalformedJson { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_parse_missing_and_wrong_version() {
        let err = parse_ndjson_message(r#"{"id":1,"method":"x"}"#).unwrap_err();
        assert!(matches!(err, FramingError::MissingVersion));

        let err = parse_ndjson_message(r#"{"jsonrpc":"1.0","id":1,"method":"x"}"#).unwrap_err();
        assert!(
            matches!(err, FramingError::UnsupportedVersion { ref version } if version == "1.0")
        );
    }

    #[test]
    fn test_parse_batch_array() {
        let err = parse_ndjson_message(r#"[{"jsonrpc":"2.0","id":1,"method":"x"}]"#).unwrap_err();
        assert!(matches!(err, FramingError::UnsupportedBatch));
    }

    #[test]
    fn test_parse_empty_line() {
        let err = parse_ndjson_message("  \n  ").unwrap_err();
        assert!(
            matches!(err, FramingError::MalformedJson { ref reason } if reason == "empty message")
        );
    }

    #[test]
    fn test_parse_scalar_rejected() {
        let err = parse_ndjson_message("42").unwrap_err();
        assert!(matches!(err, FramingError::MissingVersion));
    }

    #[test]
    fn test_parse_oversized_message() {
        let big = "x".repeat(MAX_MESSAGE_BYTES + 1);
        let err = parse_ndjson_message(&big).unwrap_err();
        assert_eq!(err.kind(), "message_too_large");
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let err = FramedMessage::decode(&[0xff, 0xfe, b'\n']).unwrap_err();
        assert!(matches!(err, FramingError::MalformedJson { .. }));
    }

    // ─────────────────────────────────────────────────────────────────────
    // FramedMessage
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn test_with_id_preserves_other_fields() {
        let line = r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"x","_meta":{"k":1}}}"#;
        let msg = parse_ndjson_message(line)
            .unwrap()
            .with_id(JsonRpcId::String("client-1:7".to_string()));

        let out: Value = serde_json::from_str(msg.to_line().trim()).unwrap();
        assert_eq!(out["id"], "client-1:7");
        assert_eq!(out["method"], "tools/call");
        assert_eq!(out["params"]["_meta"]["k"], 1);
        assert_eq!(msg.id(), Some(&JsonRpcId::String("client-1:7".to_string())));
    }

    #[test]
    fn test_with_id_on_notification_is_noop() {
        let msg = FramedMessage::notification("notifications/progress", None);
        let rewritten = msg.clone().with_id(JsonRpcId::Number(3));
        assert_eq!(msg, rewritten);
    }

    #[test]
    fn test_response_null_result_serializes() {
        let msg = FramedMessage::response(JsonRpcId::Number(4), Value::Null);
        let line = msg.to_line();
        assert!(line.ends_with('\n'));
        let out: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(out, json!({"jsonrpc": "2.0", "id": 4, "result": null}));
    }

    #[test]
    fn test_request_builder_round_trips_through_parser() {
        let msg = FramedMessage::request(
            JsonRpcId::String("h".to_string()),
            "initialize",
            Some(json!({"capabilities": {}})),
        );
        let parsed = parse_ndjson_message(&msg.to_line()).unwrap();
        assert_eq!(parsed, msg);
    }

    // ─────────────────────────────────────────────────────────────────────
    // bounded_read_line
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_bounded_read_line_reads_lines_then_eof() {
        let data: &[u8] = b"first\nsecond\n";
        let mut reader = BufReader::new(data);
        let mut buf = Vec::new();

        assert_eq!(bounded_read_line(&mut reader, &mut buf, 64).await.unwrap(), 6);
        assert_eq!(buf, b"first\n");

        buf.clear();
        assert_eq!(bounded_read_line(&mut reader, &mut buf, 64).await.unwrap(), 7);
        assert_eq!(buf, b"second\n");

        buf.clear();
        assert_eq!(bounded_read_line(&mut reader, &mut buf, 64).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bounded_read_line_skips_oversized_line() {
        let mut data = vec![b'a'; 100];
        data.push(b'\n');
        data.extend_from_slice(b"ok\n");
        let mut reader = BufReader::with_capacity(16, data.as_slice());
        let mut buf = Vec::new();

        let err = bounded_read_line(&mut reader, &mut buf, 32).await.unwrap_err();
        assert!(matches!(err, FramingError::MessageTooLarge { max_bytes: 32 }));

        buf.clear();
        let n = bounded_read_line(&mut reader, &mut buf, 32).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(buf, b"ok\n");
    }

    #[tokio::test]
    async fn test_bounded_read_line_unterminated_tail() {
        let data: &[u8] = b"tail";
        let mut reader = BufReader::new(data);
        let mut buf = Vec::new();
        assert_eq!(bounded_read_line(&mut reader, &mut buf, 64).await.unwrap(), 4);
        assert_eq!(buf, b"tail");
    }
}
