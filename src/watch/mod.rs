//! Notification surface of a coordination session.
//!
//! Every notification the service sends arrives as a [`WatchedEvent`] and is
//! handed to a [`Watcher`] on a transport-owned background thread:
//! - session notifications (`event_type == EventType::None`) go to the sink
//!   registered when the session was opened, the [`WatchDispatcher`];
//! - node notifications go to the one-shot watcher installed by the call that
//!   asked for it (`exists`, `get_children`).

mod dispatcher;
pub use dispatcher::*;


#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

/// Kind of change a notification reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Session notification, no node involved
    None,
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

/// Session state carried by every notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeeperState {
    Disconnected,
    SyncConnected,
    AuthFailed,
    ConnectedReadOnly,
    Expired,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedEvent {
    pub event_type: EventType,
    pub state: KeeperState,
    pub path: Option<String>,
}

impl WatchedEvent {
    pub fn session(state: KeeperState) -> Self {
        Self {
            event_type: EventType::None,
            state,
            path: None,
        }
    }

    pub fn node(
        event_type: EventType,
        path: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            state: KeeperState::SyncConnected,
            path: Some(path.into()),
        }
    }

    pub fn is_session_event(&self) -> bool {
        self.event_type == EventType::None
    }
}

/// Callback invoked by the transport for each delivered notification.
///
/// Called from the transport's event thread, never from the caller's task.
/// Implementations must not block for long: notifications of one session are
/// delivered one after another on that thread.
#[cfg_attr(test, automock)]
pub trait Watcher: Send + Sync + 'static {
    fn process(
        &self,
        event: WatchedEvent,
    );
}

impl<F> Watcher for F
where
    F: Fn(WatchedEvent) + Send + Sync + 'static,
{
    fn process(
        &self,
        event: WatchedEvent,
    ) {
        self(event)
    }
}
