//! Daemon configuration.
//!
//! Values come from built-in defaults, then `VAULTMUX_*` environment
//! variables, then command-line flags (see [`crate::cli`]). Invalid
//! environment values are logged and replaced by the default.
//!
//! # Environment Variables
//!
//! - `VAULTMUX_UPSTREAM_SOCKET` (default: `<runtime dir>/vaultmux/upstream.sock`)
//! - `VAULTMUX_LISTEN_SOCKET` (default: `<runtime dir>/vaultmux/mux.sock`)
//! - `VAULTMUX_IDLE_TIMEOUT_SECS` (default: 30)
//! - `VAULTMUX_HANDSHAKE_TIMEOUT_SECS` (default: 10)
//! - `VAULTMUX_DEBUG` (`1`/`true` enables debug logging)
//!
//! The runtime dir is `$XDG_RUNTIME_DIR`, falling back to the system temp dir.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;
use vaultmux_core::MAX_MESSAGE_BYTES;

pub const ENV_UPSTREAM_SOCKET: &str = "VAULTMUX_UPSTREAM_SOCKET";
pub const ENV_LISTEN_SOCKET: &str = "VAULTMUX_LISTEN_SOCKET";
pub const ENV_IDLE_TIMEOUT_SECS: &str = "VAULTMUX_IDLE_TIMEOUT_SECS";
pub const ENV_HANDSHAKE_TIMEOUT_SECS: &str = "VAULTMUX_HANDSHAKE_TIMEOUT_SECS";
pub const ENV_DEBUG: &str = "VAULTMUX_DEBUG";

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime configuration for one daemon instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxConfig {
    /// Socket the daemon connects to once at boot.
    pub upstream_socket: PathBuf,
    /// Socket the daemon listens on for clients; removed at shutdown.
    pub listen_socket: PathBuf,
    /// How long the daemon stays up with zero connected clients.
    pub idle_timeout: Duration,
    /// How long to wait for the upstream `initialize` response.
    pub handshake_timeout: Duration,
    /// Per-line size limit on every connection.
    pub max_message_bytes: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        let dir = runtime_dir().join("vaultmux");
        Self {
            upstream_socket: dir.join("upstream.sock"),
            listen_socket: dir.join("mux.sock"),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_message_bytes: MAX_MESSAGE_BYTES,
        }
    }
}

impl MuxConfig {
    /// Load from environment variables on top of the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            upstream_socket: parse_path_env(ENV_UPSTREAM_SOCKET).unwrap_or(default.upstream_socket),
            listen_socket: parse_path_env(ENV_LISTEN_SOCKET).unwrap_or(default.listen_socket),
            idle_timeout: parse_duration_env(ENV_IDLE_TIMEOUT_SECS, default.idle_timeout),
            handshake_timeout: parse_duration_env(
                ENV_HANDSHAKE_TIMEOUT_SECS,
                default.handshake_timeout,
            ),
            max_message_bytes: default.max_message_bytes,
        }
    }
}

/// Whether `VAULTMUX_DEBUG` asks for debug logging.
pub fn debug_logging_from_env() -> bool {
    std::env::var(ENV_DEBUG)
        .ok()
        .map(|v| {
            let v = v.trim();
            v == "1" || v.eq_ignore_ascii_case("true")
        })
        .unwrap_or(false)
}

fn runtime_dir() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

fn parse_path_env(var_name: &str) -> Option<PathBuf> {
    std::env::var(var_name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Parse a whole-seconds duration variable, warning on invalid values.
fn parse_duration_env(var_name: &str, default: Duration) -> Duration {
    match std::env::var(var_name) {
        Ok(value) => match value.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                warn!(
                    var = var_name,
                    value = %value,
                    default_secs = default.as_secs(),
                    "Invalid value for environment variable, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}
