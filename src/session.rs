//! Session lifecycle bookkeeping.

use parking_lot::RwLock;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

/// Lifecycle state of one session, as tracked by the connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Connecting,
    Connected,
    Disconnected,
    Expired,
    Closed,
}

impl SessionState {
    /// `Expired` and `Closed` are final; no notification moves a session out of them
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Expired | SessionState::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnected => "disconnected",
            SessionState::Expired => "expired",
            SessionState::Closed => "closed",
        }
    }
}

/// Shared state cell written by the watch dispatcher and by `connect`/`close`
#[derive(Debug)]
pub struct SessionStatus {
    state: RwLock<SessionState>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStatus {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SessionState::Connecting),
        }
    }

    pub fn get(&self) -> SessionState {
        *self.state.read()
    }

    /// Moves to `next` unless the current state is terminal.
    ///
    /// Returns the state actually held after the call.
    pub fn transition(
        &self,
        next: SessionState,
    ) -> SessionState {
        let mut state = self.state.write();
        if state.is_terminal() {
            if *state != next {
                debug!(
                    "[:SessionStatus:transition] ignoring {:?} -> {:?}, session already ended",
                    *state, next
                );
            }
            return *state;
        }
        *state = next;
        next
    }

    /// Unconditional move to `Closed`, used by `close`
    pub fn mark_closed(&self) {
        *self.state.write() = SessionState::Closed;
    }
}
