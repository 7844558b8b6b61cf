//! Error types for NDJSON framing.
//!
//! `FramingError` covers per-line failures: size limits, malformed JSON,
//! JSON-RPC version validation, batch rejection, and IO. Every variant except
//! `Io` is recoverable: the offending line is discarded and the connection
//! stays open.

/// Errors that can occur when reading or parsing an NDJSON-framed JSON-RPC
/// message.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// A single NDJSON line exceeds the configured maximum size.
    ///
    /// Checked before JSON parsing to prevent allocation of oversized values.
    #[error("Message exceeds maximum size of {max_bytes} bytes")]
    MessageTooLarge {
        /// The configured maximum message size in bytes.
        max_bytes: usize,
    },

    /// The line is not valid UTF-8 or JSON, or its structure is invalid for
    /// JSON-RPC.
    #[error("Malformed JSON: {reason}")]
    MalformedJson {
        /// Human-readable description of the parse failure.
        reason: String,
    },

    /// The `jsonrpc` field is absent from the JSON object.
    #[error("Missing required jsonrpc field")]
    MissingVersion,

    /// The `jsonrpc` field is present but not `"2.0"`.
    #[error("Unsupported JSON-RPC version: {version}")]
    UnsupportedVersion {
        /// The version string found in the message.
        version: String,
    },

    /// The message is a JSON array, i.e. a JSON-RPC batch. MCP has no batches.
    #[error("JSON-RPC batch requests (arrays) are not supported")]
    UnsupportedBatch,

    /// An underlying IO error occurred while reading from the socket.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FramingError {
    /// Short label used as the `error_type` field in framing-error logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FramingError::MessageTooLarge { .. } => "message_too_large",
            FramingError::MalformedJson { .. } => "malformed_json",
            FramingError::MissingVersion => "missing_version",
            FramingError::UnsupportedVersion { .. } => "unsupported_version",
            FramingError::UnsupportedBatch => "unsupported_batch",
            FramingError::Io(_) => "io_error",
        }
    }

    /// Whether the stream can keep being read after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FramingError::Io(_))
    }
}
