//! Command-line arguments for the `vaultmux` binary.
//!
//! Defined separately from `main.rs` so integration tests can parse them
//! directly. Every flag is optional; unset flags keep the value loaded from
//! the environment by [`MuxConfig::from_env`].

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::MuxConfig;

/// vaultmux: share one MCP server connection between many MCP clients.
#[derive(Parser, Debug)]
#[command(name = "vaultmux", version)]
pub struct DaemonArgs {
    /// Upstream MCP server socket to connect to.
    #[arg(long)]
    pub upstream_socket: Option<PathBuf>,

    /// Socket to listen on for MCP clients.
    #[arg(long)]
    pub listen_socket: Option<PathBuf>,

    /// Exit after this many seconds with no connected clients.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub idle_timeout_secs: Option<u64>,

    /// Give up if the upstream has not answered `initialize` after this many seconds.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub handshake_timeout_secs: Option<u64>,

    /// Enable debug logging.
    #[arg(long)]
    pub verbose: bool,
}

impl DaemonArgs {
    /// Apply the flags that were given on top of `base`.
    #[must_use]
    pub fn apply(&self, base: MuxConfig) -> MuxConfig {
        MuxConfig {
            upstream_socket: self.upstream_socket.clone().unwrap_or(base.upstream_socket),
            listen_socket: self.listen_socket.clone().unwrap_or(base.listen_socket),
            idle_timeout: self
                .idle_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(base.idle_timeout),
            handshake_timeout: self
                .handshake_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(base.handshake_timeout),
            max_message_bytes: base.max_message_bytes,
        }
    }
}
