//! Registry startup state machine.
//!
//! [`StartupMonitor`] is fed every event observed on a starting registry
//! process and decides, exactly once, whether startup succeeded or failed.
//! It performs no I/O, so the ordering rules can be exercised without a
//! real child process.
//!
//! Output chunks are scanned together with the unterminated tail of the
//! previous chunk, so a marker split across two reads is still found. A port
//! whose digits reach the end of the buffer is held as pending: the next
//! chunk shows where the number ends, and any other event, or
//! [`StartupMonitor::settle`] once output goes quiet, accepts it as read.

use bytes::Bytes;
use serde::Serialize;

use crate::registry::port::{locate_port, PortMatch};

/// Longest unterminated line kept between chunks while scanning for the marker.
const CARRY_LIMIT: usize = 256;

/// Lifecycle status of a registry session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No startup requested yet.
    Idle,
    /// Child spawned; waiting for the ready signal.
    Starting,
    /// Ready signal seen; registry is accepting connections.
    Ready,
    /// Torn down.
    Stopped,
    /// Child exited, errored, or timed out before becoming ready.
    Failed,
}

/// Event observed on a running registry child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildEvent {
    /// Raw chunk read from the child's stdout.
    Output(Bytes),
    /// Child exited; `None` when terminated by a signal.
    Exited {
        /// Process exit code, if available.
        code: Option<i32>,
    },
    /// Waiting on the child failed.
    Failed(String),
}

/// Terminal decision reached by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupOutcome {
    /// Registry announced readiness on this port.
    Ready(u16),
    /// Child exited before announcing readiness.
    PrematureExit(Option<i32>),
    /// Child reported an error before announcing readiness.
    SpawnFailed(String),
}

/// Tracks one startup attempt from `Starting` to `Ready` or `Failed`.
#[derive(Debug)]
pub struct StartupMonitor {
    state: LifecycleState,
    port: Option<u16>,
    pending: Option<u16>,
    carry: String,
}

impl Default for StartupMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl StartupMonitor {
    /// Create a monitor in the `Idle` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Idle,
            port: None,
            pending: None,
            carry: String::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Port recorded on the transition to `Ready`.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Port seen at the very end of the output so far, not yet accepted.
    #[must_use]
    pub fn pending_port(&self) -> Option<u16> {
        self.pending
    }

    /// `Idle → Starting`. Has no effect in any other state.
    pub fn begin(&mut self) {
        if self.state == LifecycleState::Idle {
            self.state = LifecycleState::Starting;
        }
    }

    /// `Starting → Failed` without an observed event (startup timeout).
    pub fn fail(&mut self) {
        if self.state == LifecycleState::Starting {
            self.state = LifecycleState::Failed;
        }
    }

    /// Accept the pending port after output went quiet.
    ///
    /// Yields `Ready` when a port is pending while `Starting`, otherwise
    /// nothing.
    pub fn settle(&mut self) -> Option<StartupOutcome> {
        if self.state != LifecycleState::Starting {
            return None;
        }
        let port = self.pending.take()?;
        Some(self.ready(port))
    }

    /// Feed one event. Returns an outcome only on the first terminal
    /// transition; every later event is ignored.
    pub fn observe(&mut self, event: &ChildEvent) -> Option<StartupOutcome> {
        if self.state != LifecycleState::Starting {
            return None;
        }

        match event {
            ChildEvent::Output(chunk) => {
                self.pending = None;
                let found = self.scan(chunk)?;
                if found.at_end {
                    self.pending = Some(found.port);
                    return None;
                }
                Some(self.ready(found.port))
            }
            // A pending port was the last thing printed; it stands.
            ChildEvent::Exited { .. } | ChildEvent::Failed(_) if self.pending.is_some() => {
                self.settle()
            }
            ChildEvent::Exited { code } => {
                self.state = LifecycleState::Failed;
                Some(StartupOutcome::PrematureExit(*code))
            }
            ChildEvent::Failed(detail) => {
                self.state = LifecycleState::Failed;
                Some(StartupOutcome::SpawnFailed(detail.clone()))
            }
        }
    }

    fn ready(&mut self, port: u16) -> StartupOutcome {
        self.state = LifecycleState::Ready;
        self.port = Some(port);
        self.pending = None;
        self.carry.clear();
        StartupOutcome::Ready(port)
    }

    fn scan(&mut self, chunk: &[u8]) -> Option<PortMatch> {
        let mut text = std::mem::take(&mut self.carry);
        text.push_str(&String::from_utf8_lossy(chunk));

        let found = locate_port(&text);
        if found.is_some_and(|found| !found.at_end) {
            return found;
        }

        let tail = text.rfind('\n').map_or(text.as_str(), |idx| &text[idx + 1..]);
        let mut start = tail.len().saturating_sub(CARRY_LIMIT);
        while !tail.is_char_boundary(start) {
            start += 1;
        }
        self.carry = tail[start..].to_owned();
        found
    }
}
