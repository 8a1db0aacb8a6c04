//! Session owner and node-operation facade.
//!
//! A [`Connector`] holds at most one session. `connect` opens it through the
//! configured [`Transport`], installs a fresh [`WatchDispatcher`] as the
//! session's notification sink and waits on the [`ConnectionBarrier`] until
//! the service reports the session synchronized. Node operations then run
//! against the live handle:
//! - usability faults (no session, session not `Connected`) surface as
//!   [`Error::NotConnected`];
//! - service faults never surface as errors. Mutations fold them into a
//!   [`ResultCode`], queries into [`QueryResult::Failed`].

mod scoped_timer;

#[cfg(test)]
mod connector_test;

use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use self::scoped_timer::ScopedTimer;
use crate::constants::ANY_VERSION;
use crate::metrics::OPERATION_RESULTS;
use crate::metrics::QUERY_FAILURES;
use crate::result_code::result_code_of;
use crate::transport::ServiceResult;
use crate::transport::SessionHandle;
use crate::transport::Transport;
use crate::Acl;
use crate::ConnectionBarrier;
use crate::ConnectorConfig;
use crate::CreateMode;
use crate::Error;
use crate::QueryResult;
use crate::Result;
use crate::ResultCode;
use crate::ServiceFault;
use crate::SessionState;
use crate::SessionStatus;
use crate::SetupError;
use crate::Stat;
use crate::WatchDispatcher;
use crate::Watcher;

/// The session currently held by a [`Connector`]
pub(crate) struct ActiveSession {
    handle: Arc<dyn SessionHandle>,
    status: Arc<SessionStatus>,
    barrier: Arc<ConnectionBarrier>,
    /// Cancelled by `close` to end a `connect` still waiting on the barrier
    abort: CancellationToken,
    /// Set by the first `release_handle`; the handle is closed at most once
    released: AtomicBool,
    session_timeout: Duration,
}

impl std::fmt::Debug for ActiveSession {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ActiveSession")
            .field("session_id", &self.handle.session_id())
            .field("state", &self.status.get())
            .field("barrier_released", &self.barrier.is_released())
            .field("session_timeout", &self.session_timeout)
            .finish()
    }
}

pub struct Connector {
    transport: Arc<dyn Transport>,
    config: ConnectorConfig,
    session: ArcSwapOption<ActiveSession>,
    /// Serializes writers of `session`
    lifecycle: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Connector {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("config", &self.config)
            .field("session", &self.session.load_full())
            .finish()
    }
}

impl Connector {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: ConnectorConfig,
    ) -> Self {
        Self {
            transport,
            config,
            session: ArcSwapOption::empty(),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Opens a session and waits until the service reports it synchronized.
    ///
    /// Waits without a deadline; use [`connect_with_cancel`](Self::connect_with_cancel)
    /// to bound or abort the wait.
    ///
    /// # Errors
    /// - [`Error::ConnectionSetupFailed`] if the transport cannot open a
    ///   session, `hosts` is empty, or the wait was interrupted
    /// - [`Error::AlreadyConnected`] if a live session is already held
    pub async fn connect(
        &self,
        hosts: Vec<String>,
        session_timeout: Duration,
    ) -> Result<()> {
        self.connect_with_cancel(hosts, session_timeout, CancellationToken::new())
            .await
    }

    /// [`connect`](Self::connect) with the hosts and session timeout from configuration
    pub async fn connect_with_config(&self) -> Result<()> {
        let session = &self.config.session;
        self.connect(session.hosts.clone(), session.session_timeout())
            .await
    }

    /// [`connect`](Self::connect) that gives up with [`SetupError::Interrupted`]
    /// once `cancel` fires. The half-open session is discarded in that case.
    pub async fn connect_with_cancel(
        &self,
        hosts: Vec<String>,
        session_timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<()> {
        let active = self.open_session(hosts, session_timeout, &cancel).await?;

        if let Err(e) = active.barrier.wait(&active.abort).await {
            warn!(
                "[:Connector:connect] session={:x} setup failed: {}",
                active.handle.session_id(),
                e
            );
            self.discard(&active).await;
            return Err(e.into());
        }

        info!(
            "[:Connector:connect] session={:x} connected, timeout={:?}",
            active.handle.session_id(),
            active.session_timeout
        );
        Ok(())
    }

    /// Creates the session slot in `Connecting` with a fresh dispatcher as sink
    async fn open_session(
        &self,
        hosts: Vec<String>,
        session_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Arc<ActiveSession>> {
        if hosts.is_empty() {
            return Err(SetupError::NoEndpoints.into());
        }

        let _guard = self.lifecycle.lock().await;

        if let Some(current) = self.session.load_full() {
            let state = current.status.get();
            if !state.is_terminal() {
                return Err(Error::AlreadyConnected(state));
            }
            debug!(
                "[:Connector:connect] replacing ended session={:x} ({:?})",
                current.handle.session_id(),
                state
            );
            self.session.store(None);
            release_handle(&current).await;
        }

        let status = Arc::new(SessionStatus::new());
        let barrier = Arc::new(ConnectionBarrier::new());
        let dispatcher = WatchDispatcher::new(barrier.clone(), status.clone());

        debug!(
            "[:Connector:connect] opening session against {:?}, timeout={:?}",
            hosts, session_timeout
        );
        let handle = self
            .transport
            .open(hosts, session_timeout, Arc::new(dispatcher))
            .await
            .map_err(SetupError::from)?;

        let active = Arc::new(ActiveSession {
            handle,
            status,
            barrier,
            abort: cancel.child_token(),
            released: AtomicBool::new(false),
            session_timeout,
        });
        self.session.store(Some(active.clone()));
        Ok(active)
    }

    /// Drops `active` from the slot if it is still there
    async fn discard(
        &self,
        active: &Arc<ActiveSession>,
    ) {
        let _guard = self.lifecycle.lock().await;
        let current = self.session.load_full();
        if current.is_some_and(|c| Arc::ptr_eq(&c, active)) {
            self.session.store(None);
        }
        release_handle(active).await;
    }

    /// Releases the held session.
    ///
    /// # Errors
    /// - [`Error::NotConnected`] if no session is held
    pub async fn close(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        let Some(active) = self.session.swap(None) else {
            warn!("[:Connector:close] close called without an open session");
            return Err(Error::NotConnected);
        };

        active.abort.cancel();
        release_handle(&active).await;
        info!(
            "[:Connector:close] session={:x} closed",
            active.handle.session_id()
        );
        Ok(())
    }

    /// Live session handle, only while the session is exactly `Connected`
    pub fn get_session(&self) -> Result<Arc<dyn SessionHandle>> {
        match self.session.load_full() {
            Some(active) if active.status.get() == SessionState::Connected => {
                Ok(active.handle.clone())
            }
            _ => Err(Error::NotConnected),
        }
    }

    /// Lifecycle state of the held session; `Closed` when none is held
    pub fn state(&self) -> SessionState {
        self.session
            .load_full()
            .map(|active| active.status.get())
            .unwrap_or(SessionState::Closed)
    }

    /// Service-assigned id of the held session
    pub fn session_id(&self) -> Option<u64> {
        self.session.load_full().map(|active| active.handle.session_id())
    }

    /// Metadata of `path`.
    ///
    /// With `watcher` set, a one-shot watch is left on `path` on `Found` and
    /// `NotFound`. A `Failed` result caused by the request timeout gives no
    /// guarantee either way.
    pub async fn exists(
        &self,
        path: &str,
        watcher: Option<Arc<dyn Watcher>>,
    ) -> Result<QueryResult<Stat>> {
        let handle = self.get_session()?;
        let _timer = ScopedTimer::new("exists");

        let outcome = self.bounded(handle.exists(path, watcher)).await;
        record("exists", &outcome);
        Ok(match outcome {
            Ok(Some(stat)) => QueryResult::Found(stat),
            Ok(None) => QueryResult::NotFound,
            Err(fault) => query_failed("exists", path, fault),
        })
    }

    /// Immediate children of `path`, in no particular order
    pub async fn get_children(
        &self,
        path: &str,
        watcher: Option<Arc<dyn Watcher>>,
    ) -> Result<QueryResult<Vec<String>>> {
        let handle = self.get_session()?;
        let _timer = ScopedTimer::new("get_children");

        let outcome = self.bounded(handle.get_children(path, watcher)).await;
        record("get_children", &outcome);
        Ok(match outcome {
            Ok(children) => QueryResult::Found(children),
            Err(ServiceFault::NoNode) => QueryResult::NotFound,
            Err(fault) => query_failed("get_children", path, fault),
        })
    }

    /// Creates `path` with the configured ACL.
    ///
    /// `ResultCode::NodeExists` means another client created it first.
    pub async fn create(
        &self,
        path: &str,
        data: Option<Bytes>,
        mode: CreateMode,
    ) -> Result<ResultCode> {
        self.create_with_acl(path, data, mode, self.config.acl.acl())
            .await
    }

    pub async fn create_with_acl(
        &self,
        path: &str,
        data: Option<Bytes>,
        mode: CreateMode,
        acl: Vec<Acl>,
    ) -> Result<ResultCode> {
        let outcome = self.create_node(path, data, mode, acl).await?;
        Ok(result_code_of(&outcome))
    }

    /// Like [`create`](Self::create) but returns the path the service
    /// assigned, which differs from `path` for sequential modes.
    pub async fn create_and_get_path(
        &self,
        path: &str,
        data: Option<Bytes>,
        mode: CreateMode,
    ) -> Result<std::result::Result<String, ResultCode>> {
        let outcome = self
            .create_node(path, data, mode, self.config.acl.acl())
            .await?;
        Ok(outcome.map_err(|fault| ResultCode::from(&fault)))
    }

    async fn create_node(
        &self,
        path: &str,
        data: Option<Bytes>,
        mode: CreateMode,
        acl: Vec<Acl>,
    ) -> Result<ServiceResult<String>> {
        let handle = self.get_session()?;
        let _timer = ScopedTimer::new("create");

        let outcome = self.bounded(handle.create(path, data, acl, mode)).await;
        let code = record("create", &outcome);
        if !code.is_ok() {
            debug!("[:Connector:create] {} -> {}", path, code);
        }
        Ok(outcome)
    }

    /// Deletes `path`. `None` or `Some(-1)` skips the version check.
    ///
    /// `ResultCode::BadVersion` means the node changed since `version` was read.
    pub async fn delete(
        &self,
        path: &str,
        version: Option<i32>,
    ) -> Result<ResultCode> {
        let handle = self.get_session()?;
        let _timer = ScopedTimer::new("delete");

        let version = version.unwrap_or(ANY_VERSION);
        let outcome = self.bounded(handle.delete(path, version)).await;
        let code = record("delete", &outcome);
        if !code.is_ok() {
            debug!("[:Connector:delete] {} (version {}) -> {}", path, version, code);
        }
        Ok(code)
    }

    /// Bounds one service round trip by `session.request_timeout_in_ms`
    async fn bounded<T>(
        &self,
        call: impl Future<Output = ServiceResult<T>>,
    ) -> ServiceResult<T> {
        let deadline = self.config.session.request_timeout();
        tokio::time::timeout(deadline, call)
            .await
            .unwrap_or_else(|_| {
                warn!("[:Connector] request exceeded {:?}", deadline);
                Err(ServiceFault::OperationTimeout)
            })
    }
}

/// A dropped connector closes its session in the background when a runtime
/// is available. Otherwise the transport expires it after the session timeout.
impl Drop for Connector {
    fn drop(&mut self) {
        let Some(active) = self.session.swap(None) else {
            return;
        };
        active.abort.cancel();

        let session_id = active.handle.session_id();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!("[:Connector:drop] session={:x} closing in background", session_id);
                runtime.spawn(async move {
                    release_handle(&active).await;
                });
            }
            Err(_) => {
                warn!(
                    "[:Connector:drop] session={:x} dropped outside a runtime, left to the session timeout",
                    session_id
                );
            }
        }
    }
}

async fn release_handle(active: &ActiveSession) {
    if active.released.swap(true, Ordering::SeqCst) {
        debug!(
            "[:Connector:close] session={:x} already released",
            active.handle.session_id()
        );
        return;
    }
    if let Err(fault) = active.handle.close().await {
        warn!(
            "[:Connector:close] session={:x} close reported {}",
            active.handle.session_id(),
            fault
        );
    }
    active.status.mark_closed();
}

fn record<T>(
    op: &'static str,
    outcome: &ServiceResult<T>,
) -> ResultCode {
    let code = result_code_of(outcome);
    OPERATION_RESULTS.with_label_values(&[op, code.as_str()]).inc();
    code
}

fn query_failed<T>(
    op: &'static str,
    path: &str,
    fault: ServiceFault,
) -> QueryResult<T> {
    warn!("[:Connector:{}] query on {} failed: {}", op, path, fault);
    QUERY_FAILURES.with_label_values(&[op]).inc();
    QueryResult::Failed(fault)
}
