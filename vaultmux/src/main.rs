//! vaultmux entry point.
//!
//! Exit codes: `0` when the daemon stops on its own (idle timeout) or on
//! SIGINT/SIGTERM, `1` on any fatal error (upstream unreachable, handshake
//! failure, upstream lost, socket already in use).

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use vaultmux::cli::DaemonArgs;
use vaultmux::config::{MuxConfig, debug_logging_from_env};
use vaultmux::daemon::run_daemon;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = DaemonArgs::parse();
    init_tracing(args.verbose || debug_logging_from_env());

    let config = args.apply(MuxConfig::from_env());
    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let code = match run_daemon(config, shutdown).await {
        Ok(exit) => {
            info!(reason = %exit, "vaultmux exited");
            0
        }
        Err(e) => {
            error!(error = %e, "vaultmux failed");
            eprintln!("vaultmux: {e}");
            1
        }
    };

    std::process::exit(code);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tracing Init
// ─────────────────────────────────────────────────────────────────────────────

/// Initialise tracing subscriber with stderr output.
///
/// When `verbose` is true, sets filter to `debug`. Otherwise, respects
/// `RUST_LOG`, defaulting to `info`.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ─────────────────────────────────────────────────────────────────────────────
// Signals
// ─────────────────────────────────────────────────────────────────────────────

/// SIGINT and SIGTERM cancel `shutdown`, which runs the normal cleanup path.
fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_sigint = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT, shutting down");
                shutdown_sigint.cancel();
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGINT");
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, shutting down");
                shutdown.cancel();
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
            }
        }
    });
}
