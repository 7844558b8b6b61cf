//! Process-level tests of the `vaultmux` binary: exit codes and socket cleanup.
#![cfg(unix)]

mod helpers;

use std::path::Path;
use std::process::{Command, Output};

use helpers::MockUpstream;

const BIN: &str = env!("CARGO_BIN_EXE_vaultmux");

/// A command with no inherited `VAULTMUX_*` configuration.
fn vaultmux(upstream: &Path, listen: &Path) -> Command {
    let mut cmd = Command::new(BIN);
    for var in [
        "VAULTMUX_UPSTREAM_SOCKET",
        "VAULTMUX_LISTEN_SOCKET",
        "VAULTMUX_IDLE_TIMEOUT_SECS",
        "VAULTMUX_HANDSHAKE_TIMEOUT_SECS",
        "VAULTMUX_DEBUG",
    ] {
        cmd.env_remove(var);
    }
    cmd.arg("--upstream-socket")
        .arg(upstream)
        .arg("--listen-socket")
        .arg(listen);
    cmd
}

async fn run(mut cmd: Command) -> Output {
    tokio::task::spawn_blocking(move || cmd.output())
        .await
        .unwrap()
        .expect("failed to run vaultmux")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_idle_exit_is_success_and_removes_socket() {
    let dir = tempfile::tempdir().unwrap();
    let upstream = MockUpstream::start(dir.path()).await;
    let listen = dir.path().join("mux.sock");

    let mut cmd = vaultmux(upstream.path(), &listen);
    cmd.args(["--idle-timeout-secs", "1"]);
    let output = run(cmd).await;

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(!listen.exists());
    assert_eq!(upstream.received_method("initialize").len(), 1);
}

#[test]
fn test_missing_upstream_exits_non_zero() {
    let dir = tempfile::tempdir().unwrap();
    let listen = dir.path().join("mux.sock");

    let output = vaultmux(&dir.path().join("absent.sock"), &listen)
        .output()
        .expect("failed to run vaultmux");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to connect to upstream"), "stderr: {stderr}");
    assert!(!listen.exists());
}

#[test]
fn test_zero_idle_timeout_rejected_by_cli() {
    let dir = tempfile::tempdir().unwrap();
    let output = vaultmux(&dir.path().join("u.sock"), &dir.path().join("m.sock"))
        .args(["--idle-timeout-secs", "0"])
        .output()
        .expect("failed to run vaultmux");

    assert!(!output.status.success());
    assert_ne!(output.status.code(), Some(0));
}
