//! Client registry: accepted connections, their identities, and their I/O tasks.
//!
//! Each registered connection gets two tasks:
//! - a reader that turns NDJSON lines into [`ClientEvent::Message`]s, dropping
//!   lines that fail to frame or parse;
//! - a writer that drains the client's outbox, so lines written to one client
//!   are never interleaved.
//!
//! The outbox holds at most [`OUTBOX_CAPACITY`] lines. A client that stops
//! reading until its outbox fills is disconnected.
//!
//! EOF, a read error, a write failure or a full outbox end the connection with
//! a [`ClientEvent::Closed`]. The event loop may see more than one `Closed` for
//! the same client (reader and writer both noticing); [`ClientRegistry::remove`]
//! only reports the first.

use std::collections::HashMap;
use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use vaultmux_core::{FramedMessage, bounded_read_line};

/// Lines queued for one client before it counts as stalled.
pub const OUTBOX_CAPACITY: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Client Identity & Events
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque per-connection identity, unique for the daemon's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// What a client connection reports to the event loop.
#[derive(Debug)]
pub enum ClientEvent {
    /// A well-formed JSON-RPC message from the client.
    Message {
        client: ClientId,
        message: FramedMessage,
    },
    /// The connection ended: EOF, an I/O error, or a full outbox.
    Closed { client: ClientId },
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

struct ClientHandle {
    outbox: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl ClientHandle {
    /// Queue `line` without waiting. A full outbox cancels the connection,
    /// which the reader then reports as [`ClientEvent::Closed`].
    fn push(&self, client: ClientId, line: String) -> bool {
        match self.outbox.try_send(line) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                if !self.cancel.is_cancelled() {
                    tracing::warn!(
                        client_id = %client,
                        capacity = OUTBOX_CAPACITY,
                        "client outbox full, disconnecting"
                    );
                    self.cancel.cancel();
                }
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Live client connections keyed by identity.
pub struct ClientRegistry {
    next_id: u64,
    clients: HashMap<ClientId, ClientHandle>,
    events: mpsc::UnboundedSender<ClientEvent>,
    max_message_bytes: usize,
    shutdown: CancellationToken,
}

impl ClientRegistry {
    /// `events` receives every client's messages and close notifications.
    /// Cancelling `shutdown` stops all client tasks.
    pub fn new(
        events: mpsc::UnboundedSender<ClientEvent>,
        max_message_bytes: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            next_id: 1,
            clients: HashMap::new(),
            events,
            max_message_bytes,
            shutdown,
        }
    }

    /// Allocate an identity for `stream` and start its reader and writer tasks.
    pub fn register<S>(&mut self, stream: S) -> ClientId
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let client = ClientId::new(self.next_id);
        self.next_id += 1;

        let (reader, writer) = tokio::io::split(stream);
        let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
        let cancel = self.shutdown.child_token();

        tokio::spawn(read_client(
            client,
            reader,
            self.events.clone(),
            self.max_message_bytes,
            cancel.clone(),
        ));
        tokio::spawn(write_client(
            client,
            writer,
            outbox_rx,
            self.events.clone(),
            cancel.clone(),
        ));

        self.clients.insert(
            client,
            ClientHandle {
                outbox: outbox_tx,
                cancel,
            },
        );
        client
    }

    /// Forget `client` and stop its tasks. Returns `false` if it was already gone.
    pub fn remove(&mut self, client: ClientId) -> bool {
        match self.clients.remove(&client) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Queue `message` for `client`. Returns `false` if the client is gone or
    /// its outbox is full.
    pub fn send(&self, client: ClientId, message: &FramedMessage) -> bool {
        self.clients
            .get(&client)
            .is_some_and(|handle| handle.push(client, message.to_line()))
    }

    /// Queue `message` for every connected client; returns how many accepted it.
    pub fn broadcast(&self, message: &FramedMessage) -> usize {
        let line = message.to_line();
        self.clients
            .iter()
            .filter(|(client, handle)| handle.push(**client, line.clone()))
            .count()
    }

    pub fn contains(&self, client: ClientId) -> bool {
        self.clients.contains_key(&client)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Disconnect every client.
    pub fn close_all(&mut self) {
        for (_, handle) in self.clients.drain() {
            handle.cancel.cancel();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-connection Tasks
// ─────────────────────────────────────────────────────────────────────────────

async fn read_client<S>(
    client: ClientId,
    reader: ReadHalf<S>,
    events: mpsc::UnboundedSender<ClientEvent>,
    max_message_bytes: usize,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut raw_buf = Vec::new();

    loop {
        raw_buf.clear();

        let bytes_read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = bounded_read_line(&mut reader, &mut raw_buf, max_message_bytes) => {
                match result {
                    Ok(n) => n,
                    Err(e) if e.is_recoverable() => {
                        tracing::warn!(client_id = %client, error_type = e.kind(), "oversized line from client, skipping");
                        continue;
                    }
                    Err(e) => {
                        tracing::debug!(client_id = %client, error = %e, "client read failed");
                        break;
                    }
                }
            }
        };

        if bytes_read == 0 {
            tracing::debug!(client_id = %client, "client EOF");
            break;
        }

        if raw_buf.trim_ascii().is_empty() {
            continue;
        }

        match FramedMessage::decode(&raw_buf) {
            Ok(message) => {
                if events.send(ClientEvent::Message { client, message }).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(
                    client_id = %client,
                    error_type = e.kind(),
                    error = %e,
                    "dropping malformed line from client"
                );
            }
        }
    }

    let _ = events.send(ClientEvent::Closed { client });
}

async fn write_client<S>(
    client: ClientId,
    mut writer: WriteHalf<S>,
    mut outbox: mpsc::Receiver<String>,
    events: mpsc::UnboundedSender<ClientEvent>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
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

        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = async {
                writer.write_all(line.as_bytes()).await?;
                writer.flush().await
            } => result,
        };

        if let Err(e) = written {
            tracing::debug!(client_id = %client, error = %e, "client write failed");
            let _ = events.send(ClientEvent::Closed { client });
            return;
        }
    }

    let _ = writer.shutdown().await;
}
