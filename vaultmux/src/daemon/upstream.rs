//! The single shared connection to the upstream MCP server.
//!
//! At boot the daemon connects once, performs the `initialize` handshake as
//! itself, and caches the result. After that the link is two tasks:
//!
//! ```text
//! event loop ──outbox──▶ writer task ──▶ upstream socket
//! event loop ◀─inbound── reader task ◀── upstream socket
//! ```
//!
//! The writer task owns the write half, so lines sent upstream are never
//! interleaved. When either task stops (EOF, I/O error) the inbound channel
//! closes and [`UpstreamLink::recv`] returns `None`.

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vaultmux_core::{FramedMessage, JsonRpcId, JsonRpcMessageKind, bounded_read_line};

use crate::error::MuxError;

/// Identifier of the daemon's own `initialize` request.
pub const HANDSHAKE_REQUEST_ID: &str = "vaultmux-handshake";

/// MCP protocol revision the daemon asks for.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Upper bound on flushing queued lines when the link is closed.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

// ─────────────────────────────────────────────────────────────────────────────
// Handshake Cache
// ─────────────────────────────────────────────────────────────────────────────

/// The upstream's `initialize` result, kept verbatim for the daemon's lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeCache {
    result: Value,
}

impl HandshakeCache {
    pub fn new(result: Value) -> Self {
        Self { result }
    }

    /// The `result` object exactly as the upstream sent it.
    pub fn result(&self) -> &Value {
        &self.result
    }

    /// `serverInfo.name`, if the upstream reported one.
    pub fn server_name(&self) -> Option<&str> {
        self.result
            .get("serverInfo")
            .and_then(|info| info.get("name"))
            .and_then(Value::as_str)
    }

    /// The protocol revision the upstream agreed to.
    pub fn protocol_version(&self) -> Option<&str> {
        self.result.get("protocolVersion").and_then(Value::as_str)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams<'a> {
    protocol_version: &'a str,
    capabilities: serde_json::Map<String, Value>,
    client_info: ClientInfo<'a>,
}

#[derive(Serialize)]
struct ClientInfo<'a> {
    name: &'a str,
    version: &'a str,
}

fn initialize_request() -> Result<FramedMessage, MuxError> {
    let params = InitializeParams {
        protocol_version: PROTOCOL_VERSION,
        capabilities: serde_json::Map::new(),
        client_info: ClientInfo {
            name: "vaultmux",
            version: env!("CARGO_PKG_VERSION"),
        },
    };
    let params = serde_json::to_value(&params).map_err(std::io::Error::from)?;
    Ok(FramedMessage::request(
        JsonRpcId::String(HANDSHAKE_REQUEST_ID.to_string()),
        "initialize",
        Some(params),
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Upstream Link
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to the running reader and writer tasks.
pub struct UpstreamLink {
    outbox: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<FramedMessage>,
    cancel: CancellationToken,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl UpstreamLink {
    /// Connect to the upstream socket at `path` and run the handshake.
    ///
    /// # Errors
    ///
    /// `UpstreamConnect` if the socket cannot be reached, otherwise whatever
    /// [`UpstreamLink::handshake`] returns.
    pub async fn connect(
        path: &Path,
        handshake_timeout: Duration,
        max_message_bytes: usize,
    ) -> Result<(Self, HandshakeCache), MuxError> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| MuxError::UpstreamConnect {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::debug!(path = %path.display(), "connected to upstream");
        Self::handshake(stream, handshake_timeout, max_message_bytes).await
    }

    /// Run `initialize` / `notifications/initialized` on an established
    /// stream, then start the reader and writer tasks.
    ///
    /// # Errors
    ///
    /// - `HandshakeTimeout` if no matching response arrives in time
    /// - `HandshakeRejected` if the upstream answers with an error
    /// - `UpstreamClosed` on EOF before the response
    /// - `Io` / `Framing` for transport failures
    pub async fn handshake<S>(
        stream: S,
        handshake_timeout: Duration,
        max_message_bytes: usize,
    ) -> Result<(Self, HandshakeCache), MuxError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        write_line(&mut write_half, &initialize_request()?).await?;

        let result = tokio::time::timeout(
            handshake_timeout,
            await_initialize_result(&mut reader, max_message_bytes),
        )
        .await
        .map_err(|_| MuxError::HandshakeTimeout {
            timeout: handshake_timeout,
        })??;

        write_line(
            &mut write_half,
            &FramedMessage::notification("notifications/initialized", None),
        )
        .await?;

        let cache = HandshakeCache::new(result);
        tracing::info!(
            server_name = cache.server_name().unwrap_or("unknown"),
            protocol_version = cache.protocol_version().unwrap_or("unknown"),
            "upstream handshake complete"
        );

        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let reader_task = tokio::spawn(read_upstream(
            reader,
            inbound_tx,
            max_message_bytes,
            cancel.clone(),
        ));
        let writer_task = tokio::spawn(write_upstream(write_half, outbox_rx, cancel.clone()));

        let link = Self {
            outbox: outbox_tx,
            inbound: inbound_rx,
            cancel,
            reader_task,
            writer_task,
        };
        Ok((link, cache))
    }

    /// Queue `message` for the upstream.
    ///
    /// # Errors
    ///
    /// `UpstreamLost` if the writer task has stopped.
    pub fn forward(&self, message: &FramedMessage) -> Result<(), MuxError> {
        self.outbox
            .send(message.to_line())
            .map_err(|_| MuxError::UpstreamLost)
    }

    /// Next message from the upstream; `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<FramedMessage> {
        self.inbound.recv().await
    }

    /// Flush queued lines, then close the connection.
    pub async fn close(self) {
        let Self {
            outbox,
            inbound,
            cancel,
            reader_task,
            writer_task,
        } = self;

        drop(outbox);
        if tokio::time::timeout(CLOSE_GRACE, writer_task).await.is_err() {
            tracing::warn!("upstream writer did not drain in time");
        }
        cancel.cancel();
        let _ = reader_task.await;
        drop(inbound);
        tracing::debug!("upstream connection closed");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handshake I/O
// ─────────────────────────────────────────────────────────────────────────────

async fn write_line<W>(writer: &mut W, message: &FramedMessage) -> Result<(), MuxError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(message.to_line().as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read until the response to the daemon's `initialize` arrives.
async fn await_initialize_result<S>(
    reader: &mut BufReader<ReadHalf<S>>,
    max_message_bytes: usize,
) -> Result<Value, MuxError>
where
    S: AsyncRead,
{
    let handshake_id = JsonRpcId::String(HANDSHAKE_REQUEST_ID.to_string());
    let mut raw_buf = Vec::new();

    loop {
        raw_buf.clear();
        match bounded_read_line(reader, &mut raw_buf, max_message_bytes).await {
            Ok(0) => return Err(MuxError::UpstreamClosed),
            Ok(_) => {}
            Err(e) if e.is_recoverable() => {
                tracing::warn!(error_type = e.kind(), "skipping oversized line during handshake");
                continue;
            }
            Err(e) => return Err(e.into()),
        }

        if raw_buf.trim_ascii().is_empty() {
            continue;
        }

        let message = match FramedMessage::decode(&raw_buf) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error_type = e.kind(), error = %e, "skipping malformed line during handshake");
                continue;
            }
        };

        match message.kind() {
            JsonRpcMessageKind::Response { id } if *id == handshake_id => {
                if let Some(error) = message.error() {
                    return Err(MuxError::HandshakeRejected {
                        reason: error.to_string(),
                    });
                }
                return match message.result() {
                    Some(result) => Ok(result.clone()),
                    None => Err(MuxError::HandshakeRejected {
                        reason: "initialize response carried no result".to_string(),
                    }),
                };
            }
            other => {
                tracing::debug!(
                    kind = other.label(),
                    method = other.method().unwrap_or(""),
                    "skipping upstream message received before initialize response"
                );
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Link Tasks
// ─────────────────────────────────────────────────────────────────────────────

async fn read_upstream<S>(
    mut reader: BufReader<ReadHalf<S>>,
    inbound: mpsc::UnboundedSender<FramedMessage>,
    max_message_bytes: usize,
    cancel: CancellationToken,
) where
    S: AsyncRead + Send + 'static,
{
    let mut raw_buf = Vec::new();

    loop {
        raw_buf.clear();

        let bytes_read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = bounded_read_line(&mut reader, &mut raw_buf, max_message_bytes) => {
                match result {
                    Ok(n) => n,
                    Err(e) if e.is_recoverable() => {
                        tracing::warn!(error_type = e.kind(), "oversized line from upstream, skipping");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "upstream read failed");
                        break;
                    }
                }
            }
        };

        if bytes_read == 0 {
            tracing::warn!("upstream closed the connection");
            break;
        }

        if raw_buf.trim_ascii().is_empty() {
            continue;
        }

        match FramedMessage::decode(&raw_buf) {
            Ok(message) => {
                if inbound.send(message).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(
                    error_type = e.kind(),
                    error = %e,
                    "dropping malformed line from upstream"
                );
            }
        }
    }

    cancel.cancel();
}

async fn write_upstream<S>(
    mut writer: WriteHalf<S>,
    mut outbox: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) where
    S: AsyncWrite + Send + 'static,
{
    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = outbox.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };

        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            tracing::warn!(error = %e, "upstream write failed");
            // Stop the reader too so the event loop sees the link as lost.
            cancel.cancel();
            return;
        }
    }

    let _ = writer.shutdown().await;
}
