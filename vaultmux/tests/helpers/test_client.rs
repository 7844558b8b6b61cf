//! NDJSON client and in-process daemon harness.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vaultmux::config::MuxConfig;
use vaultmux::daemon::{DaemonExit, run_daemon};
use vaultmux::error::MuxError;
use vaultmux_core::MAX_MESSAGE_BYTES;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A downstream MCP client talking NDJSON to the daemon.
pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub async fn connect(path: &Path) -> Self {
        let stream = UnixStream::connect(path)
            .await
            .expect("failed to connect to daemon");
        let (read_half, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    pub async fn send(&mut self, message: Value) {
        self.send_raw(&format!("{message}\n")).await;
    }

    pub async fn send_raw(&mut self, line: &str) {
        self.writer
            .write_all(line.as_bytes())
            .await
            .expect("failed to write to daemon");
    }

    pub async fn request(&mut self, id: Value, method: &str) {
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": {}}))
            .await;
    }

    pub async fn notify(&mut self, method: &str) {
        self.send(json!({"jsonrpc": "2.0", "method": method})).await;
    }

    /// Next message from the daemon; panics on timeout or EOF.
    pub async fn recv(&mut self) -> Value {
        self.try_recv(RECV_TIMEOUT)
            .await
            .expect("daemon closed the connection")
    }

    /// `None` on EOF. Panics if nothing arrives within `timeout`.
    pub async fn try_recv(&mut self, timeout: Duration) -> Option<Value> {
        let mut line = String::new();
        let n = tokio::time::timeout(timeout, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for daemon")
            .expect("read from daemon failed");
        if n == 0 {
            return None;
        }
        Some(serde_json::from_str(line.trim()).expect("daemon sent invalid JSON"))
    }

    /// Assert nothing arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        let mut line = String::new();
        if let Ok(result) = tokio::time::timeout(window, self.reader.read_line(&mut line)).await {
            panic!("expected no message, got {result:?}: {line}");
        }
    }

    /// Send a request and wait for its response.
    pub async fn call(&mut self, id: Value, method: &str) -> Value {
        self.request(id, method).await;
        self.recv().await
    }
}

/// Configuration pointing at `upstream`, listening in `dir`.
pub fn test_config(dir: &Path, upstream: &Path, idle_timeout: Duration) -> MuxConfig {
    MuxConfig {
        upstream_socket: upstream.to_path_buf(),
        listen_socket: dir.join("run").join("mux.sock"),
        idle_timeout,
        handshake_timeout: Duration::from_secs(2),
        max_message_bytes: MAX_MESSAGE_BYTES,
    }
}

/// A daemon running on the test runtime.
pub struct DaemonHandle {
    pub listen: PathBuf,
    pub shutdown: CancellationToken,
    task: JoinHandle<Result<DaemonExit, MuxError>>,
}

impl DaemonHandle {
    /// Spawn the daemon and wait until its listening socket exists.
    pub async fn start(config: MuxConfig) -> Self {
        let listen = config.listen_socket.clone();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_daemon(config, shutdown.clone()));

        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        while !listen.exists() {
            assert!(!task.is_finished(), "daemon exited during boot");
            assert!(
                tokio::time::Instant::now() < deadline,
                "daemon did not bind its socket"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        Self {
            listen,
            shutdown,
            task,
        }
    }

    pub async fn client(&self) -> TestClient {
        TestClient::connect(&self.listen).await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the daemon to stop on its own.
    pub async fn join(self) -> Result<DaemonExit, MuxError> {
        tokio::time::timeout(RECV_TIMEOUT, self.task)
            .await
            .expect("daemon did not stop")
            .expect("daemon task panicked")
    }
}
