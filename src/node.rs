//! Node-level types shared by the connector and transports.

use serde::Deserialize;
use serde::Serialize;

use crate::ServiceFault;

/// Node metadata as reported by the service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Transaction id that created the node
    pub czxid: i64,
    /// Transaction id of the last data change
    pub mzxid: i64,
    /// Transaction id of the last child list change
    pub pzxid: i64,
    /// Creation time, milliseconds since epoch
    pub ctime: i64,
    /// Last modification time, milliseconds since epoch
    pub mtime: i64,
    /// Data version, bumped on every data change
    pub version: i32,
    /// Child list version, bumped on every child create/delete
    pub cversion: i32,
    /// ACL version
    pub aversion: i32,
    /// Owning session for ephemeral nodes, 0 otherwise
    pub ephemeral_owner: u64,
    pub data_length: i32,
    pub num_children: i32,
}

/// How a node is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreateMode {
    Persistent,
    Ephemeral,
    PersistentSequential,
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(&self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// Permission bits of an ACL entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Perms(pub u32);

impl Perms {
    pub const READ: Perms = Perms(1);
    pub const WRITE: Perms = Perms(1 << 1);
    pub const CREATE: Perms = Perms(1 << 2);
    pub const DELETE: Perms = Perms(1 << 3);
    pub const ADMIN: Perms = Perms(1 << 4);
    pub const ALL: Perms = Perms(0x1f);

    pub fn contains(
        &self,
        other: Perms,
    ) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Authentication identity an ACL entry applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Id {
    pub scheme: String,
    pub id: String,
}

impl Id {
    pub fn new(
        scheme: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            id: id.into(),
        }
    }
}

/// One ACL entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Acl {
    pub perms: Perms,
    pub id: Id,
}

impl Acl {
    /// Everything allowed for anyone
    pub fn open_unsafe() -> Vec<Acl> {
        vec![Acl {
            perms: Perms::ALL,
            id: Id::new("world", "anyone"),
        }]
    }

    /// Everything allowed for the creator's authenticated identity
    pub fn creator_all() -> Vec<Acl> {
        vec![Acl {
            perms: Perms::ALL,
            id: Id::new("auth", ""),
        }]
    }

    /// Read-only for anyone
    pub fn read_unsafe() -> Vec<Acl> {
        vec![Acl {
            perms: Perms::READ,
            id: Id::new("world", "anyone"),
        }]
    }
}

/// Outcome of a read-only query
///
/// Unlike mutating operations, queries distinguish "the node is not there"
/// from "the question could not be answered". A query the service rejected
/// installs no watch. After `Failed(OperationTimeout)` the request may still
/// have reached the service, so a watch may or may not be in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult<T> {
    Found(T),
    NotFound,
    Failed(ServiceFault),
}

impl<T> QueryResult<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, QueryResult::Found(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, QueryResult::NotFound)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, QueryResult::Failed(_))
    }

    /// Collapses the result into an `Option`, losing the failure reason
    pub fn found(self) -> Option<T> {
        match self {
            QueryResult::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(
        self,
        f: impl FnOnce(T) -> U,
    ) -> QueryResult<U> {
        match self {
            QueryResult::Found(value) => QueryResult::Found(f(value)),
            QueryResult::NotFound => QueryResult::NotFound,
            QueryResult::Failed(fault) => QueryResult::Failed(fault),
        }
    }
}
