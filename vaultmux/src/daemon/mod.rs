//! The multiplexing daemon.
//!
//! One upstream connection, many client connections, one event loop. The loop
//! owns the router, the registry and the idle tracker outright; the only
//! concurrency is in the per-connection I/O tasks, which talk to the loop over
//! channels.
//!
//! Boot order: connect and handshake upstream, then bind the listening socket.
//! A failed handshake therefore never leaves a socket file behind.

pub mod intercept;
pub mod lifecycle;
pub mod registry;
pub mod router;
pub mod socket;
pub mod upstream;

use std::fmt;

use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use vaultmux_core::FramedMessage;

use crate::config::MuxConfig;
use crate::error::MuxError;

use intercept::{Interception, intercept};
use lifecycle::IdleTracker;
use registry::{ClientEvent, ClientId, ClientRegistry};
use router::{DropReason, InboundRoute, Router};
use socket::{SocketCleanup, bind_listener};
use upstream::{HandshakeCache, UpstreamLink};

/// Why the daemon stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonExit {
    /// No clients for the whole idle timeout.
    IdleTimeout,
    /// SIGINT/SIGTERM (or the caller cancelled the shutdown token).
    Signal,
}

impl fmt::Display for DaemonExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdleTimeout => write!(f, "idle_timeout"),
            Self::Signal => write!(f, "signal"),
        }
    }
}

/// Run the daemon until it goes idle, `shutdown` is cancelled, or a fatal
/// error occurs. The listening socket is removed on every path out once it
/// has been bound.
///
/// # Errors
///
/// Any [`MuxError`]: an unreachable or misbehaving upstream at boot, an
/// unusable listening socket, or losing the upstream later on.
pub async fn run_daemon(
    config: MuxConfig,
    shutdown: CancellationToken,
) -> Result<DaemonExit, MuxError> {
    tracing::info!(
        upstream = %config.upstream_socket.display(),
        listen = %config.listen_socket.display(),
        idle_timeout_ms = config.idle_timeout.as_millis() as u64,
        "starting vaultmux"
    );

    let (upstream, cache) = tokio::select! {
        biased;
        _ = shutdown.cancelled() => return Ok(DaemonExit::Signal),
        linked = UpstreamLink::connect(
            &config.upstream_socket,
            config.handshake_timeout,
            config.max_message_bytes,
        ) => linked?,
    };

    let listener = match bind_listener(&config.listen_socket).await {
        Ok(listener) => listener,
        Err(e) => {
            upstream.close().await;
            return Err(e);
        }
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let daemon = Daemon {
        registry: ClientRegistry::new(events_tx, config.max_message_bytes, CancellationToken::new()),
        router: Router::new(),
        upstream,
        cache,
        tracker: IdleTracker::new(config.idle_timeout, Instant::now()),
        cleanup: SocketCleanup::new(&config.listen_socket),
    };

    daemon.run(listener, events_rx, shutdown).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Event Loop
// ─────────────────────────────────────────────────────────────────────────────

struct Daemon {
    registry: ClientRegistry,
    router: Router,
    upstream: UpstreamLink,
    cache: HandshakeCache,
    tracker: IdleTracker,
    cleanup: SocketCleanup,
}

impl Daemon {
    async fn run(
        mut self,
        listener: UnixListener,
        mut events: mpsc::UnboundedReceiver<ClientEvent>,
        shutdown: CancellationToken,
    ) -> Result<DaemonExit, MuxError> {
        let outcome = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break Ok(DaemonExit::Signal),

                Some(event) = events.recv() => match event {
                    ClientEvent::Message { client, message } => {
                        if let Err(e) = self.handle_client_message(client, message) {
                            break Err(e);
                        }
                    }
                    ClientEvent::Closed { client } => self.handle_client_closed(client),
                },

                inbound = self.upstream.recv() => match inbound {
                    Some(message) => self.handle_upstream_message(message),
                    None => {
                        tracing::error!("upstream connection lost");
                        break Err(MuxError::UpstreamLost);
                    }
                },

                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let client = self.registry.register(stream);
                        self.tracker.on_connect();
                        tracing::info!(
                            client_id = %client,
                            clients = self.registry.len(),
                            state = %self.tracker.state(),
                            "client connected"
                        );
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },

                _ = idle_sleep(self.tracker.deadline()) => {
                    if self.tracker.on_timer_fired(Instant::now()) {
                        tracing::info!("idle timeout elapsed with no clients");
                        break Ok(DaemonExit::IdleTimeout);
                    }
                }
            }
        };

        drop(listener);
        self.shut_down(&outcome).await;
        outcome
    }

    fn handle_client_message(
        &mut self,
        client: ClientId,
        message: FramedMessage,
    ) -> Result<(), MuxError> {
        // Lines read before the close was processed.
        if !self.registry.contains(client) {
            return Ok(());
        }

        match intercept(message, &self.cache) {
            Interception::Reply(reply) => {
                self.registry.send(client, &reply);
            }
            Interception::Swallow => {}
            Interception::Forward(message) => {
                let outbound = self.router.outbound(client, message);
                tracing::debug!(
                    client_id = %client,
                    kind = outbound.kind().label(),
                    method = outbound.method().unwrap_or(""),
                    "forwarding to upstream"
                );
                self.upstream.forward(&outbound)?;
            }
        }
        Ok(())
    }

    fn handle_client_closed(&mut self, client: ClientId) {
        if !self.registry.remove(client) {
            return;
        }
        let orphaned = self.router.purge_client(client);
        self.tracker.on_disconnect(Instant::now());
        tracing::info!(
            client_id = %client,
            orphaned,
            clients = self.registry.len(),
            state = %self.tracker.state(),
            "client disconnected"
        );
    }

    fn handle_upstream_message(&mut self, message: FramedMessage) {
        match self.router.inbound(message) {
            InboundRoute::Deliver {
                client,
                message,
                method,
                latency,
            } => {
                let delivered = self.registry.send(client, &message);
                tracing::debug!(
                    client_id = %client,
                    method = %method,
                    latency_ms = latency.as_millis() as u64,
                    delivered,
                    "routed upstream response"
                );
            }
            InboundRoute::Broadcast(message) => {
                let recipients = self.registry.broadcast(&message);
                tracing::debug!(
                    method = message.method().unwrap_or(""),
                    recipients,
                    "broadcast upstream notification"
                );
            }
            InboundRoute::Drop { message, reason } => match reason {
                DropReason::Unroutable => tracing::debug!(
                    id = %message.id().map(ToString::to_string).unwrap_or_default(),
                    reason = reason.as_str(),
                    "dropping upstream response with no waiting client"
                ),
                DropReason::UpstreamRequest => tracing::warn!(
                    method = message.method().unwrap_or(""),
                    reason = reason.as_str(),
                    "dropping request initiated by upstream"
                ),
            },
        }
    }

    /// ShuttingDown → Terminated.
    async fn shut_down(self, outcome: &Result<DaemonExit, MuxError>) {
        let Self {
            mut registry,
            router,
            upstream,
            mut tracker,
            mut cleanup,
            ..
        } = self;

        tracker.begin_shutdown();
        match outcome {
            Ok(exit) => tracing::info!(reason = %exit, state = %tracker.state(), "shutting down"),
            Err(e) => tracing::error!(error = %e, state = %tracker.state(), "shutting down after fatal error"),
        }

        let orphaned = router.pending_count();
        if orphaned > 0 {
            tracing::warn!(orphaned, "requests still in flight at shutdown will not be answered");
        }

        registry.close_all();
        upstream.close().await;
        cleanup.remove();
        tracker.mark_terminated();
        tracing::info!(
            path = %cleanup.path().display(),
            state = %tracker.state(),
            "daemon stopped"
        );
    }
}

async fn idle_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
