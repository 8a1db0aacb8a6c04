//! In-process coordination service and its [`Transport`].
//!
//! [`MemEnsemble`] keeps a node tree, sessions and one-shot watches with the
//! same rules the real service applies (parent must exist, ephemeral nodes
//! are leaves and die with their session, sequential names use the parent's
//! child version, deletes honour versions and refuse non-empty nodes).
//! Every session owns an event thread, so notifications reach watchers in the
//! order the ensemble produced them, off the caller's task.
//!
//! The ensemble also exposes control hooks to drive a session through its
//! lifecycle from the outside: holding the handshake, disconnecting,
//! reconnecting, expiring, and injecting faults into the next request.

mod data_tree;
mod event_thread;


use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use self::data_tree::DataTree;
use self::data_tree::Trigger;
use self::data_tree::WatchKind;
use self::event_thread::EventThread;
use super::ServiceResult;
use super::SessionHandle;
use super::Transport;
use crate::config::validate_endpoint;
use crate::Acl;
use crate::CreateMode;
use crate::KeeperState;
use crate::ServiceFault;
use crate::SessionState;
use crate::Stat;
use crate::TransportError;
use crate::WatchedEvent;
use crate::Watcher;

struct WatchRegistration {
    session_id: u64,
    watcher: Arc<dyn Watcher>,
}

struct SessionEntry {
    sink: Arc<dyn Watcher>,
    events: EventThread,
    state: RwLock<SessionState>,
    timeout: Duration,
}

impl SessionEntry {
    fn notify(
        &self,
        state: KeeperState,
    ) {
        self.events.deliver(self.sink.clone(), WatchedEvent::session(state));
    }
}

struct EnsembleInner {
    hosts: Vec<String>,
    tree: Mutex<DataTree>,
    data_watches: DashMap<String, Vec<WatchRegistration>>,
    child_watches: DashMap<String, Vec<WatchRegistration>>,
    sessions: DashMap<u64, Arc<SessionEntry>>,
    next_session_id: AtomicU64,
    auto_handshake: AtomicBool,
    injected_faults: Mutex<VecDeque<ServiceFault>>,
    request_delay_ms: AtomicU64,
}

/// In-process stand-in for a coordination service cluster
#[derive(Clone)]
pub struct MemEnsemble {
    inner: Arc<EnsembleInner>,
}

impl std::fmt::Debug for MemEnsemble {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("MemEnsemble")
            .field("hosts", &self.inner.hosts)
            .field("sessions", &self.inner.sessions.len())
            .finish()
    }
}

impl MemEnsemble {
    /// Creates an ensemble answering on `hosts` (`host:port` each)
    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            inner: Arc::new(EnsembleInner {
                hosts,
                tree: Mutex::new(DataTree::new()),
                data_watches: DashMap::new(),
                child_watches: DashMap::new(),
                sessions: DashMap::new(),
                next_session_id: AtomicU64::new(1),
                auto_handshake: AtomicBool::new(true),
                injected_faults: Mutex::new(VecDeque::new()),
                request_delay_ms: AtomicU64::new(0),
            }),
        }
    }

    pub fn transport(&self) -> MemTransport {
        MemTransport {
            ensemble: self.clone(),
        }
    }

    pub fn hosts(&self) -> &[String] {
        &self.inner.hosts
    }

    // -
    // Control hooks

    /// When disabled, new sessions stay `Connecting` until [`complete_handshake`](Self::complete_handshake)
    pub fn set_auto_handshake(
        &self,
        enabled: bool,
    ) {
        self.inner.auto_handshake.store(enabled, Ordering::SeqCst);
    }

    pub fn complete_handshake(
        &self,
        session_id: u64,
    ) -> bool {
        self.inner.move_session(session_id, SessionState::Connected, KeeperState::SyncConnected)
    }

    /// Connection to the session's server dropped; the session itself survives
    pub fn disconnect(
        &self,
        session_id: u64,
    ) -> bool {
        self.inner.move_session(
            session_id,
            SessionState::Disconnected,
            KeeperState::Disconnected,
        )
    }

    pub fn reconnect(
        &self,
        session_id: u64,
    ) -> bool {
        self.inner.move_session(session_id, SessionState::Connected, KeeperState::SyncConnected)
    }

    /// Ends the session on the service side: ephemerals are removed and the
    /// session's sink receives `Expired`.
    pub fn expire(
        &self,
        session_id: u64,
    ) -> bool {
        self.inner
            .end_session(session_id, SessionState::Expired, KeeperState::Expired)
            .is_some()
    }

    /// Delivers a raw session notification without changing ensemble state
    pub fn send_session_event(
        &self,
        session_id: u64,
        state: KeeperState,
    ) -> bool {
        match self.inner.sessions.get(&session_id) {
            Some(entry) => {
                entry.notify(state);
                true
            }
            None => false,
        }
    }

    /// The next request of any session fails with `fault`
    pub fn inject_fault(
        &self,
        fault: ServiceFault,
    ) {
        self.inner.injected_faults.lock().push_back(fault);
    }

    /// Adds a fixed delay to every request
    pub fn set_request_delay(
        &self,
        delay: Duration,
    ) {
        self.inner.request_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    // -
    // Inspection

    pub fn session_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.inner.sessions.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn session_state(
        &self,
        session_id: u64,
    ) -> Option<SessionState> {
        self.inner.sessions.get(&session_id).map(|e| *e.state.read())
    }

    pub fn session_timeout(
        &self,
        session_id: u64,
    ) -> Option<Duration> {
        self.inner.sessions.get(&session_id).map(|e| e.timeout)
    }

    pub fn node_count(&self) -> usize {
        self.inner.tree.lock().node_count()
    }

    pub fn node_data(
        &self,
        path: &str,
    ) -> Option<Bytes> {
        self.inner.tree.lock().node(path).and_then(|n| n.data.clone())
    }

    pub fn node_acl(
        &self,
        path: &str,
    ) -> Option<Vec<Acl>> {
        self.inner.tree.lock().node(path).map(|n| n.acl.clone())
    }

    /// Number of installed, not yet fired watches
    pub fn watch_count(&self) -> usize {
        let data: usize = self.inner.data_watches.iter().map(|e| e.value().len()).sum();
        let child: usize = self.inner.child_watches.iter().map(|e| e.value().len()).sum();
        data + child
    }
}

impl EnsembleInner {
    fn accepts(
        &self,
        endpoint: &str,
    ) -> bool {
        self.hosts.iter().any(|h| h == endpoint)
    }

    fn open_session(
        &self,
        endpoints: &[String],
        session_timeout: Duration,
        sink: Arc<dyn Watcher>,
    ) -> std::result::Result<u64, TransportError> {
        for endpoint in endpoints {
            validate_endpoint(endpoint)
                .map_err(|reason| TransportError::InvalidEndpoint(format!("{endpoint}: {reason}")))?;
        }
        if !endpoints.iter().any(|e| self.accepts(e)) {
            return Err(TransportError::Unreachable {
                endpoints: endpoints.to_vec(),
            });
        }

        let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let entry = Arc::new(SessionEntry {
            sink,
            events: EventThread::spawn(session_id)?,
            state: RwLock::new(SessionState::Connecting),
            timeout: session_timeout,
        });
        self.sessions.insert(session_id, entry.clone());
        info!(
            "[:MemEnsemble:open] session={:x} opened, timeout={:?}",
            session_id, session_timeout
        );

        if self.auto_handshake.load(Ordering::SeqCst) {
            *entry.state.write() = SessionState::Connected;
            entry.notify(KeeperState::SyncConnected);
        }
        Ok(session_id)
    }

    fn move_session(
        &self,
        session_id: u64,
        next: SessionState,
        notification: KeeperState,
    ) -> bool {
        let Some(entry) = self.sessions.get(&session_id).map(|e| e.value().clone()) else {
            return false;
        };
        *entry.state.write() = next;
        debug!("[:MemEnsemble] session={:x} -> {:?}", session_id, next);
        entry.notify(notification);
        true
    }

    /// Removes the session, its ephemerals and its pending watches.
    ///
    /// The session's event thread stops accepting notifications but is not
    /// joined; the ended entry is returned for callers that want to wait.
    fn end_session(
        &self,
        session_id: u64,
        final_state: SessionState,
        notification: KeeperState,
    ) -> Option<Arc<SessionEntry>> {
        let entry = {
            let mut tree = self.tree.lock();
            let (_, entry) = self.sessions.remove(&session_id)?;
            *entry.state.write() = final_state;

            drop_watches_of(&self.data_watches, session_id);
            drop_watches_of(&self.child_watches, session_id);
            let triggers = tree.remove_ephemerals(session_id);
            self.fire(triggers);

            entry.notify(notification);
            entry
        };

        info!(
            "[:MemEnsemble] session={:x} ended as {:?}",
            session_id, final_state
        );
        entry.events.stop();
        Some(entry)
    }

    fn expire_abandoned(
        &self,
        session_id: u64,
    ) {
        if self
            .end_session(session_id, SessionState::Expired, KeeperState::Expired)
            .is_some()
        {
            info!(
                "[:MemEnsemble] session={:x} expired, no live handle within its timeout",
                session_id
            );
        }
    }

    /// Session must be usable for requests
    fn usable_session(
        &self,
        session_id: u64,
    ) -> ServiceResult<()> {
        let state = self
            .sessions
            .get(&session_id)
            .map(|e| *e.state.read())
            .ok_or(ServiceFault::SessionExpired)?;

        match state {
            SessionState::Connected => Ok(()),
            SessionState::Connecting | SessionState::Disconnected => {
                Err(ServiceFault::ConnectionLoss)
            }
            SessionState::Expired | SessionState::Closed => Err(ServiceFault::SessionExpired),
        }
    }

    async fn before_request(
        &self,
        session_id: u64,
    ) -> ServiceResult<()> {
        self.usable_session(session_id)?;

        if let Some(fault) = self.injected_faults.lock().pop_front() {
            debug!("[:MemEnsemble] session={:x} injected fault {:?}", session_id, fault);
            return Err(fault);
        }

        let delay = self.request_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(())
    }

    fn register_watch(
        &self,
        kind: WatchKind,
        path: &str,
        session_id: u64,
        watcher: Arc<dyn Watcher>,
    ) {
        let table = match kind {
            WatchKind::Data => &self.data_watches,
            WatchKind::Child => &self.child_watches,
        };
        table
            .entry(path.to_string())
            .or_default()
            .push(WatchRegistration { session_id, watcher });
    }

    /// Fires and removes the watches hit by `triggers`. Caller holds the tree lock.
    fn fire(
        &self,
        triggers: Vec<Trigger>,
    ) {
        for trigger in triggers {
            let table = match trigger.kind {
                WatchKind::Data => &self.data_watches,
                WatchKind::Child => &self.child_watches,
            };
            let Some((_, registrations)) = table.remove(&trigger.path) else {
                continue;
            };

            for registration in registrations {
                let Some(entry) = self.sessions.get(&registration.session_id).map(|e| e.value().clone())
                else {
                    continue;
                };
                trace!(
                    "[:MemEnsemble:fire] {:?} on {} -> session={:x}",
                    trigger.event_type,
                    trigger.path,
                    registration.session_id
                );
                let event = WatchedEvent::node(trigger.event_type, trigger.path.clone());
                if !entry.events.deliver(registration.watcher, event) {
                    warn!(
                        "[:MemEnsemble:fire] session={:x} event thread gone, notification dropped",
                        registration.session_id
                    );
                }
            }
        }
    }

    fn exists(
        &self,
        session_id: u64,
        path: &str,
        watcher: Option<Arc<dyn Watcher>>,
    ) -> ServiceResult<Option<Stat>> {
        let tree = self.tree.lock();
        let stat = tree.stat(path)?;
        if let Some(watcher) = watcher {
            self.register_watch(WatchKind::Data, path, session_id, watcher);
        }
        Ok(stat)
    }

    fn get_children(
        &self,
        session_id: u64,
        path: &str,
        watcher: Option<Arc<dyn Watcher>>,
    ) -> ServiceResult<Vec<String>> {
        let tree = self.tree.lock();
        let children = tree.children(path)?;
        if let Some(watcher) = watcher {
            self.register_watch(WatchKind::Child, path, session_id, watcher);
        }
        Ok(children)
    }

    fn create(
        &self,
        session_id: u64,
        path: &str,
        data: Option<Bytes>,
        acl: Vec<Acl>,
        mode: CreateMode,
    ) -> ServiceResult<String> {
        let mut tree = self.tree.lock();
        let (actual_path, triggers) = tree.create(session_id, path, data, acl, mode)?;
        self.fire(triggers);
        Ok(actual_path)
    }

    fn delete(
        &self,
        path: &str,
        version: i32,
    ) -> ServiceResult<()> {
        let mut tree = self.tree.lock();
        let triggers = tree.delete(path, version)?;
        self.fire(triggers);
        Ok(())
    }
}

fn drop_watches_of(
    table: &DashMap<String, Vec<WatchRegistration>>,
    session_id: u64,
) {
    table.retain(|_, registrations| {
        registrations.retain(|r| r.session_id != session_id);
        !registrations.is_empty()
    });
}

/// [`Transport`] opening sessions against a [`MemEnsemble`]
#[derive(Debug, Clone)]
pub struct MemTransport {
    ensemble: MemEnsemble,
}

impl MemTransport {
    pub fn ensemble(&self) -> &MemEnsemble {
        &self.ensemble
    }
}

#[async_trait]
impl Transport for MemTransport {
    async fn open(
        &self,
        endpoints: Vec<String>,
        session_timeout: Duration,
        sink: Arc<dyn Watcher>,
    ) -> std::result::Result<Arc<dyn SessionHandle>, TransportError> {
        let session_id = self.ensemble.inner.open_session(&endpoints, session_timeout, sink)?;
        Ok(Arc::new(MemSession {
            session_id,
            inner: self.ensemble.inner.clone(),
        }))
    }
}

/// Session handle returned by [`MemTransport`]
pub struct MemSession {
    session_id: u64,
    inner: Arc<EnsembleInner>,
}

impl std::fmt::Debug for MemSession {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("MemSession").field("session_id", &self.session_id).finish()
    }
}

#[async_trait]
impl SessionHandle for MemSession {
    fn session_id(&self) -> u64 {
        self.session_id
    }

    async fn exists(
        &self,
        path: &str,
        watcher: Option<Arc<dyn Watcher>>,
    ) -> ServiceResult<Option<Stat>> {
        self.inner.before_request(self.session_id).await?;
        self.inner.exists(self.session_id, path, watcher)
    }

    async fn get_children(
        &self,
        path: &str,
        watcher: Option<Arc<dyn Watcher>>,
    ) -> ServiceResult<Vec<String>> {
        self.inner.before_request(self.session_id).await?;
        self.inner.get_children(self.session_id, path, watcher)
    }

    async fn create(
        &self,
        path: &str,
        data: Option<Bytes>,
        acl: Vec<Acl>,
        mode: CreateMode,
    ) -> ServiceResult<String> {
        self.inner.before_request(self.session_id).await?;
        self.inner.create(self.session_id, path, data, acl, mode)
    }

    async fn delete(
        &self,
        path: &str,
        version: i32,
    ) -> ServiceResult<()> {
        self.inner.before_request(self.session_id).await?;
        self.inner.delete(path, version)
    }

    /// Returns once every notification of the session has been delivered
    async fn close(&self) -> ServiceResult<()> {
        let Some(entry) =
            self.inner.end_session(self.session_id, SessionState::Closed, KeeperState::Closed)
        else {
            debug!(
                "[:MemSession:close] session={:x} already ended",
                self.session_id
            );
            return Ok(());
        };

        // Joining blocks, keep it off the runtime's worker threads.
        if let Err(e) = tokio::task::spawn_blocking(move || entry.events.join()).await {
            warn!(
                "[:MemSession:close] session={:x} event thread join failed: {}",
                self.session_id, e
            );
        }
        Ok(())
    }
}

/// A handle dropped without `close` stops heartbeating: the ensemble expires
/// its session once the session timeout has passed.
impl Drop for MemSession {
    fn drop(&mut self) {
        let Some(timeout) = self.inner.sessions.get(&self.session_id).map(|e| e.timeout) else {
            return;
        };

        let session_id = self.session_id;
        let inner = self.inner.clone();
        debug!(
            "[:MemSession:drop] session={:x} abandoned, expiring in {:?}",
            session_id, timeout
        );
        let expiry = std::thread::Builder::new()
            .name(format!("zk-expiry-{session_id:x}"))
            .spawn(move || {
                std::thread::sleep(timeout);
                inner.expire_abandoned(session_id);
            });

        if let Err(e) = expiry {
            warn!(
                "[:MemSession:drop] session={:x} expiry timer failed to start ({}), expiring now",
                session_id, e
            );
            self.inner.expire_abandoned(session_id);
        }
    }
}
