//! Transport abstraction over the coordination service.
//!
//! The connector never speaks a wire protocol itself. It consumes a
//! [`Transport`] that can open sessions, and the [`SessionHandle`] each open
//! session yields. Implementations own:
//! - the connection to the service and its liveness (session timeout),
//! - a background thread delivering notifications in service order,
//! - one-shot watch bookkeeping for `exists`/`get_children`.
//!
//! [`mem`] provides an in-process implementation.

pub mod mem;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)]
use mockall::automock;

use crate::Acl;
use crate::CreateMode;
use crate::ServiceFault;
use crate::Stat;
use crate::TransportError;
use crate::Watcher;

/// Outcome of a single service call
pub type ServiceResult<T> = std::result::Result<T, ServiceFault>;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens a session against `endpoints`.
    ///
    /// Returns as soon as the session object exists; the session is usable
    /// only after `sink` has received a `SyncConnected` notification. `sink`
    /// is the exclusive receiver of session notifications for this session.
    ///
    /// # Errors
    /// - [`TransportError::Unreachable`] if no endpoint accepts the session
    /// - [`TransportError::InvalidEndpoint`] for malformed endpoints
    async fn open(
        &self,
        endpoints: Vec<String>,
        session_timeout: Duration,
        sink: Arc<dyn Watcher>,
    ) -> std::result::Result<Arc<dyn SessionHandle>, TransportError>;
}

/// One open session with the service
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SessionHandle: Send + Sync + 'static {
    /// Service-assigned session id
    fn session_id(&self) -> u64;

    /// Node metadata, or `None` if the node does not exist.
    ///
    /// With `watcher` set, a one-shot watch is installed on success, also when
    /// the node is absent (it then fires on creation).
    async fn exists(
        &self,
        path: &str,
        watcher: Option<Arc<dyn Watcher>>,
    ) -> ServiceResult<Option<Stat>>;

    /// Names of the immediate children, in no particular order
    async fn get_children(
        &self,
        path: &str,
        watcher: Option<Arc<dyn Watcher>>,
    ) -> ServiceResult<Vec<String>>;

    /// Creates a node and returns its actual path (differs from `path` for sequential modes)
    async fn create(
        &self,
        path: &str,
        data: Option<Bytes>,
        acl: Vec<Acl>,
        mode: CreateMode,
    ) -> ServiceResult<String>;

    /// Deletes a node; `version == -1` skips the version check
    async fn delete(
        &self,
        path: &str,
        version: i32,
    ) -> ServiceResult<()>;

    /// Ends the session and releases its transport resources
    async fn close(&self) -> ServiceResult<()>;
}
