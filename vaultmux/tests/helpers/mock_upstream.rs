//! Mock upstream MCP server for integration testing.
//!
//! Listens on a Unix socket, accepts exactly one connection (the daemon's),
//! and records every message it receives. Behaviour per method:
//!
//! - `initialize`: `serverInfo` `mock-vault` 1.2.3 (or an error when
//!   `reject_initialize` is set)
//! - `slow/echo`: answered after [`SLOW_REPLY_DELAY`]
//! - `emit/notification`: sends `notifications/resources/updated`, then answers
//! - any other request: answered with `{"method": .., "id_seen": ..}`
//! - notifications and responses: recorded only
//!
//! With `silent` set nothing is ever answered.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const SLOW_REPLY_DELAY: Duration = Duration::from_millis(300);

/// Knobs for misbehaving upstreams.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockBehaviour {
    pub reject_initialize: bool,
    pub silent: bool,
}

/// A running mock upstream.
pub struct MockUpstream {
    path: PathBuf,
    received: Arc<Mutex<Vec<Value>>>,
    task: JoinHandle<()>,
}

impl MockUpstream {
    /// Start a well-behaved mock listening at `<dir>/upstream.sock`.
    pub async fn start(dir: &Path) -> Self {
        Self::start_with(dir, MockBehaviour::default()).await
    }

    pub async fn start_with(dir: &Path, behaviour: MockBehaviour) -> Self {
        let path = dir.join("upstream.sock");
        let listener = UnixListener::bind(&path).expect("failed to bind mock upstream");
        let received = Arc::new(Mutex::new(Vec::new()));

        let task = tokio::spawn(serve(listener, received.clone(), behaviour));
        Self {
            path,
            received,
            task,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every message received so far, in arrival order.
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    /// Received messages whose `method` is `method`.
    pub fn received_method(&self, method: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|m| m["method"] == method)
            .collect()
    }

    /// Drop the daemon's connection and stop listening.
    pub async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// The `result` a well-behaved mock answers `initialize` with.
pub fn initialize_result() -> Value {
    json!({
        "protocolVersion": "2025-06-18",
        "capabilities": {"tools": {"listChanged": true}, "resources": {}},
        "serverInfo": {"name": "mock-vault", "version": "1.2.3"}
    })
}

async fn serve(listener: UnixListener, received: Arc<Mutex<Vec<Value>>>, behaviour: MockBehaviour) {
    let Ok((stream, _)) = listener.accept().await else {
        return;
    };
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let (delayed_tx, mut delayed_rx) = mpsc::unbounded_channel::<Value>();

    loop {
        let outgoing: Vec<Value> = tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let Ok(message) = serde_json::from_str::<Value>(&line) else {
                        continue;
                    };
                    received.lock().unwrap().push(message.clone());
                    if behaviour.silent {
                        continue;
                    }
                    respond(&message, behaviour, &delayed_tx)
                }
                _ => break,
            },
            Some(delayed) = delayed_rx.recv() => vec![delayed],
        };

        for message in outgoing {
            let mut line = message.to_string();
            line.push('\n');
            if write_half.write_all(line.as_bytes()).await.is_err() {
                return;
            }
        }
    }
}

fn respond(
    message: &Value,
    behaviour: MockBehaviour,
    delayed: &mpsc::UnboundedSender<Value>,
) -> Vec<Value> {
    let (Some(method), Some(id)) = (message["method"].as_str(), message.get("id")) else {
        return Vec::new();
    };

    match method {
        "initialize" if behaviour.reject_initialize => vec![json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32603, "message": "vault is locked"}
        })],
        "initialize" => vec![json!({"jsonrpc": "2.0", "id": id, "result": initialize_result()})],
        "slow/echo" => {
            let reply = echo(method, id);
            let delayed = delayed.clone();
            tokio::spawn(async move {
                tokio::time::sleep(SLOW_REPLY_DELAY).await;
                let _ = delayed.send(reply);
            });
            Vec::new()
        }
        "emit/notification" => vec![
            json!({
                "jsonrpc": "2.0",
                "method": "notifications/resources/updated",
                "params": {"uri": "vault://notes/today.md"}
            }),
            echo(method, id),
        ],
        _ => vec![echo(method, id)],
    }
}

fn echo(method: &str, id: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {"method": method, "id_seen": id}
    })
}
