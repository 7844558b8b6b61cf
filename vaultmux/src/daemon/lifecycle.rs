//! Idle timeout and daemon lifecycle state machine.
//!
//! ```text
//! Idle ⇄ Active
//!   │
//!   └─(idle timer fires)→ ShuttingDown → Terminated
//! ```
//!
//! - **Idle**: zero clients. The idle timer is armed on entry, including at
//!   boot before any client has connected.
//! - **Active**: at least one client. No timer armed.
//! - **ShuttingDown**: timer fired (or a signal arrived); cleanup in progress.
//! - **Terminated**: upstream closed, listening socket removed.
//!
//! [`IdleTracker`] is pure bookkeeping. The event loop in [`super::run_daemon`]
//! feeds it connect/disconnect events and sleeps until [`IdleTracker::deadline`].

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// Daemon lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    /// At least one client connected.
    Active,
    /// No clients; idle timer armed.
    Idle,
    /// Cleanup in progress.
    ShuttingDown,
    /// Cleanup complete.
    Terminated,
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Idle => write!(f, "idle"),
            Self::ShuttingDown => write!(f, "shutting_down"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Connected-client count plus the pending idle deadline.
#[derive(Debug)]
pub struct IdleTracker {
    state: DaemonState,
    clients: usize,
    idle_timeout: Duration,
    deadline: Option<Instant>,
}

impl IdleTracker {
    /// Start in `Idle` with the timer armed from `now`.
    pub fn new(idle_timeout: Duration, now: Instant) -> Self {
        Self {
            state: DaemonState::Idle,
            clients: 0,
            idle_timeout,
            deadline: Some(now + idle_timeout),
        }
    }

    pub fn state(&self) -> DaemonState {
        self.state
    }

    pub fn clients(&self) -> usize {
        self.clients
    }

    /// When the idle timer fires, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// A client connected. Idle → Active disarms the timer.
    pub fn on_connect(&mut self) {
        if self.is_stopping() {
            return;
        }
        self.clients += 1;
        if self.state == DaemonState::Idle {
            self.state = DaemonState::Active;
            self.deadline = None;
        }
    }

    /// A client disconnected. Dropping to zero clients arms the timer.
    pub fn on_disconnect(&mut self, now: Instant) {
        if self.is_stopping() {
            return;
        }
        self.clients = self.clients.saturating_sub(1);
        if self.clients == 0 && self.state == DaemonState::Active {
            self.state = DaemonState::Idle;
            self.deadline = Some(now + self.idle_timeout);
        }
    }

    /// The idle sleep completed. Returns `true` if this moved the daemon to
    /// `ShuttingDown`; a stale wakeup (timer disarmed or re-armed later)
    /// returns `false`.
    pub fn on_timer_fired(&mut self, now: Instant) -> bool {
        match (self.state, self.deadline) {
            (DaemonState::Idle, Some(deadline)) if now >= deadline => {
                self.begin_shutdown();
                true
            }
            _ => false,
        }
    }

    /// Enter `ShuttingDown` regardless of client count (signals, upstream loss).
    pub fn begin_shutdown(&mut self) {
        if !self.is_stopping() {
            self.state = DaemonState::ShuttingDown;
            self.deadline = None;
        }
    }

    pub fn mark_terminated(&mut self) {
        self.state = DaemonState::Terminated;
        self.deadline = None;
    }

    fn is_stopping(&self) -> bool {
        matches!(
            self.state,
            DaemonState::ShuttingDown | DaemonState::Terminated
        )
    }
}
