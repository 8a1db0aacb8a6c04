use std::sync::Arc;

use tracing::debug;
use tracing::info;
use tracing::warn;

use super::EventType;
use super::KeeperState;
use super::WatchedEvent;
use super::Watcher;
use crate::metrics::SESSION_EVENTS;
use crate::ConnectionBarrier;
use crate::SessionState;
use crate::SessionStatus;

/// Session-level notification sink.
///
/// Classifies each notification:
/// - `SyncConnected` releases the connection barrier (once) and marks the
///   session `Connected`;
/// - `Disconnected`, `Expired` and `Closed` only update the state cell, the
///   dispatcher never drives a reconnect;
/// - node notifications have no default handling.
#[derive(Debug, Clone)]
pub struct WatchDispatcher {
    barrier: Arc<ConnectionBarrier>,
    status: Arc<SessionStatus>,
}

impl WatchDispatcher {
    pub fn new(
        barrier: Arc<ConnectionBarrier>,
        status: Arc<SessionStatus>,
    ) -> Self {
        Self { barrier, status }
    }

    fn on_session_event(
        &self,
        state: KeeperState,
    ) {
        SESSION_EVENTS.with_label_values(&[keeper_state_label(state)]).inc();

        match state {
            KeeperState::SyncConnected => {
                let current = self.status.transition(SessionState::Connected);
                if current != SessionState::Connected {
                    warn!(
                        "[:WatchDispatcher:process] SyncConnected after session ended ({:?}), ignored",
                        current
                    );
                    return;
                }
                if self.barrier.release() {
                    info!("[:WatchDispatcher:process] session synchronized, connect may proceed");
                } else {
                    debug!("[:WatchDispatcher:process] session re-synchronized");
                }
            }
            KeeperState::Disconnected => {
                let current = self.status.transition(SessionState::Disconnected);
                warn!("[:WatchDispatcher:process] session disconnected, state={:?}", current);
            }
            KeeperState::Expired => {
                self.status.transition(SessionState::Expired);
                warn!("[:WatchDispatcher:process] session expired by the service");
            }
            KeeperState::Closed => {
                self.status.transition(SessionState::Closed);
                debug!("[:WatchDispatcher:process] session closed");
            }
            KeeperState::AuthFailed | KeeperState::ConnectedReadOnly => {
                warn!(
                    "[:WatchDispatcher:process] unhandled session notification: {:?}",
                    state
                );
            }
        }
    }
}

impl Watcher for WatchDispatcher {
    fn process(
        &self,
        event: WatchedEvent,
    ) {
        match event.event_type {
            EventType::None => self.on_session_event(event.state),
            event_type => {
                debug!(
                    "[:WatchDispatcher:process] node notification {:?} on {:?}, no default handler",
                    event_type, event.path
                );
            }
        }
    }
}

pub(crate) fn keeper_state_label(state: KeeperState) -> &'static str {
    match state {
        KeeperState::Disconnected => "disconnected",
        KeeperState::SyncConnected => "sync_connected",
        KeeperState::AuthFailed => "auth_failed",
        KeeperState::ConnectedReadOnly => "connected_read_only",
        KeeperState::Expired => "expired",
        KeeperState::Closed => "closed",
    }
}
