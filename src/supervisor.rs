//! # Connection Supervisor
//!
//! State machine driving the device link through
//! Disconnected -> Connecting -> Connected -> Degraded -> Disconnected.
//!
//! Two thresholds give the recovery hysteresis: a single dropped frame
//! never triggers a reconnect, but a genuinely unplugged device is torn
//! down and re-opened within a few seconds. All state lives in explicit
//! fields and is mutated only by the loop that owns the supervisor.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel; the initial and post-teardown state
    Disconnected,
    /// An open attempt is in flight
    Connecting,
    /// Frames are flowing (or have not failed long enough to matter)
    Connected,
    /// Recent consecutive read failures, reconnect not yet triggered
    Degraded,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

/// One observed state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Supervisor for one device link
#[derive(Debug)]
pub struct ConnectionSupervisor {
    state: ConnectionState,
    consecutive_failures: u32,
    degraded_after: u32,
    disconnected_after: u32,
    reconnect_wait: Duration,
    next_attempt_at: Option<Instant>,
}

impl ConnectionSupervisor {
    /// # Arguments
    ///
    /// * `degraded_after` - Consecutive failures moving Connected to Degraded
    /// * `disconnected_after` - Consecutive failures moving Degraded to
    ///   Disconnected (counted from the first failure, so strictly larger)
    /// * `reconnect_wait` - Backoff between reconnect attempts
    pub fn new(degraded_after: u32, disconnected_after: u32, reconnect_wait: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            consecutive_failures: 0,
            degraded_after,
            disconnected_after,
            reconnect_wait,
            next_attempt_at: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether a connect attempt should be made now
    ///
    /// False while the post-failure backoff is still running.
    pub fn ready_to_connect(&self, now: Instant) -> bool {
        self.state == ConnectionState::Disconnected
            && self.next_attempt_at.map_or(true, |at| now >= at)
    }

    /// Disconnected -> Connecting
    pub fn begin_connect(&mut self) -> StateChange {
        self.transition(ConnectionState::Connecting)
    }

    /// Connecting -> Connected
    pub fn connect_succeeded(&mut self) -> StateChange {
        self.consecutive_failures = 0;
        self.next_attempt_at = None;
        self.transition(ConnectionState::Connected)
    }

    /// Connecting -> Disconnected, with backoff before the next attempt
    pub fn connect_failed(&mut self, now: Instant) -> StateChange {
        self.next_attempt_at = Some(now + self.reconnect_wait);
        self.transition(ConnectionState::Disconnected)
    }

    /// A read produced a frame; Degraded links recover to Connected
    pub fn read_succeeded(&mut self) -> Option<StateChange> {
        self.consecutive_failures = 0;
        if self.state == ConnectionState::Degraded {
            return Some(self.transition(ConnectionState::Connected));
        }
        None
    }

    /// A read failed or returned nothing.
    ///
    /// Returns the resulting transition, if any. Reaching the larger
    /// threshold schedules a reconnect `reconnect_wait` from `now`; the
    /// caller is responsible for closing the transport.
    pub fn read_failed(&mut self, now: Instant) -> Option<StateChange> {
        if !matches!(self.state, ConnectionState::Connected | ConnectionState::Degraded) {
            return None;
        }

        self.consecutive_failures += 1;

        if self.state == ConnectionState::Connected
            && self.consecutive_failures >= self.degraded_after
        {
            warn!("{} consecutive failed reads, link degraded", self.consecutive_failures);
            return Some(self.transition(ConnectionState::Degraded));
        }

        if self.state == ConnectionState::Degraded
            && self.consecutive_failures >= self.disconnected_after
        {
            warn!(
                "{} consecutive failed reads, closing link and reconnecting in {:?}",
                self.consecutive_failures, self.reconnect_wait
            );
            self.consecutive_failures = 0;
            self.next_attempt_at = Some(now + self.reconnect_wait);
            return Some(self.transition(ConnectionState::Disconnected));
        }

        None
    }

    /// Force Disconnected at shutdown, whatever the current state
    pub fn shutdown(&mut self) -> Option<StateChange> {
        if self.state == ConnectionState::Disconnected {
            return None;
        }
        Some(self.transition(ConnectionState::Disconnected))
    }

    fn transition(&mut self, to: ConnectionState) -> StateChange {
        let change = StateChange { from: self.state, to };
        info!("connection state: {} -> {}", change.from, change.to);
        self.state = to;
        change
    }
}
