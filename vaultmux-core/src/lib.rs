//! vaultmux core: transport-agnostic protocol primitives.
//!
//! This library provides JSON-RPC 2.0 message classification and NDJSON line
//! framing shared by the multiplexing daemon (`vaultmux`) and its tests. It
//! performs no socket I/O of its own beyond reading lines from any
//! [`tokio::io::AsyncBufRead`].

pub mod error;
pub mod jsonrpc;
pub mod ndjson;

pub use error::FramingError;
pub use jsonrpc::{JsonRpcClassifyError, JsonRpcId, JsonRpcMessageKind, classify_jsonrpc};
pub use ndjson::{FramedMessage, MAX_MESSAGE_BYTES, bounded_read_line, parse_ndjson_message};
