//! Error types for the multiplexing daemon.
//!
//! Per-line framing problems never surface here: they are logged and the line
//! is dropped (see `vaultmux_core::FramingError`). `MuxError` covers the
//! failures that end the daemon: no usable upstream, a lost upstream, or a
//! listening socket that cannot be bound.

use std::path::PathBuf;
use std::time::Duration;

use vaultmux_core::FramingError;

/// Fatal daemon errors. Each one maps to a non-zero process exit code.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// The upstream socket could not be connected at boot.
    #[error("Failed to connect to upstream at {}: {source}", path.display())]
    UpstreamConnect {
        /// The upstream socket path.
        path: PathBuf,
        /// The underlying connect error.
        source: std::io::Error,
    },

    /// The upstream did not answer `initialize` in time.
    #[error("Upstream did not answer initialize within {}ms", timeout.as_millis())]
    HandshakeTimeout {
        /// The configured handshake timeout.
        timeout: Duration,
    },

    /// The upstream answered `initialize` with a JSON-RPC error.
    #[error("Upstream rejected initialize: {reason}")]
    HandshakeRejected {
        /// The error object (or a description of the bad response).
        reason: String,
    },

    /// The upstream closed the connection before the handshake completed.
    #[error("Upstream closed the connection during the handshake")]
    UpstreamClosed,

    /// The upstream connection was lost after a successful handshake.
    #[error("Upstream connection lost")]
    UpstreamLost,

    /// The listening socket could not be created.
    #[error("Failed to bind listening socket at {}: {source}", path.display())]
    Bind {
        /// The listening socket path.
        path: PathBuf,
        /// The underlying bind error.
        source: std::io::Error,
    },

    /// Another daemon is already accepting connections on the listening socket.
    #[error("Another vaultmux daemon is already listening at {}", path.display())]
    AlreadyRunning {
        /// The listening socket path.
        path: PathBuf,
    },

    /// Framing failure on the upstream stream during the handshake.
    #[error("Upstream framing error: {0}")]
    Framing(#[from] FramingError),

    /// An underlying IO error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
