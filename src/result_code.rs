//! Normalized operation results.
//!
//! The coordination service reports failures through its own, wider fault
//! taxonomy ([`ServiceFault`]). Node operations never hand those faults to the
//! caller directly: they are folded into the closed [`ResultCode`] set through
//! a total mapping, with [`ResultCode::SystemError`] as the catch-all.

use serde::Deserialize;
use serde::Serialize;

/// Closed set of outcomes returned by mutating node operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    Ok,
    NoNode,
    NodeExists,
    NotEmpty,
    BadVersion,
    ConnectionLoss,
    SessionExpired,
    SystemError,
    Unknown,
}

impl ResultCode {
    pub const ALL: [ResultCode; 9] = [
        ResultCode::Ok,
        ResultCode::NoNode,
        ResultCode::NodeExists,
        ResultCode::NotEmpty,
        ResultCode::BadVersion,
        ResultCode::ConnectionLoss,
        ResultCode::SessionExpired,
        ResultCode::SystemError,
        ResultCode::Unknown,
    ];

    pub fn is_ok(&self) -> bool {
        matches!(self, ResultCode::Ok)
    }

    /// Stable label used for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultCode::Ok => "ok",
            ResultCode::NoNode => "no_node",
            ResultCode::NodeExists => "node_exists",
            ResultCode::NotEmpty => "not_empty",
            ResultCode::BadVersion => "bad_version",
            ResultCode::ConnectionLoss => "connection_loss",
            ResultCode::SessionExpired => "session_expired",
            ResultCode::SystemError => "system_error",
            ResultCode::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fault kinds reported by the coordination service
///
/// Numeric codes follow the service's wire values, see [`ServiceFault::code`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceFault {
    // System and server-side errors
    #[error("System error")]
    SystemError,

    #[error("Runtime inconsistency")]
    RuntimeInconsistency,

    #[error("Data inconsistency")]
    DataInconsistency,

    #[error("Connection loss")]
    ConnectionLoss,

    #[error("Marshalling error")]
    MarshallingError,

    #[error("Operation unimplemented")]
    Unimplemented,

    #[error("Operation timeout")]
    OperationTimeout,

    #[error("Bad arguments")]
    BadArguments,

    #[error("Unknown session")]
    UnknownSession,

    #[error("New config has no quorum")]
    NewConfigNoQuorum,

    #[error("Reconfig in progress")]
    ReconfigInProgress,

    // API errors
    #[error("API error")]
    ApiError,

    #[error("No node")]
    NoNode,

    #[error("Not authenticated")]
    NoAuth,

    #[error("Bad version")]
    BadVersion,

    #[error("Ephemeral nodes may not have children")]
    NoChildrenForEphemerals,

    #[error("Node exists")]
    NodeExists,

    #[error("Directory not empty")]
    NotEmpty,

    #[error("Session expired")]
    SessionExpired,

    #[error("Invalid callback")]
    InvalidCallback,

    #[error("Invalid ACL")]
    InvalidAcl,

    #[error("Authentication failed")]
    AuthFailed,

    #[error("Session moved")]
    SessionMoved,

    #[error("Not a read-only call")]
    NotReadOnly,

    /// The request left the client but its outcome was never observed
    #[error("Outcome unknown: {0}")]
    Unknown(String),

    /// Numeric code this client does not recognize
    #[error("Unrecognized service fault code {0}")]
    Unrecognized(i32),
}

impl ServiceFault {
    /// Decodes a numeric service fault. `0` is success and yields `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        let fault = match code {
            0 => return None,
            -1 => ServiceFault::SystemError,
            -2 => ServiceFault::RuntimeInconsistency,
            -3 => ServiceFault::DataInconsistency,
            -4 => ServiceFault::ConnectionLoss,
            -5 => ServiceFault::MarshallingError,
            -6 => ServiceFault::Unimplemented,
            -7 => ServiceFault::OperationTimeout,
            -8 => ServiceFault::BadArguments,
            -12 => ServiceFault::UnknownSession,
            -13 => ServiceFault::NewConfigNoQuorum,
            -14 => ServiceFault::ReconfigInProgress,
            -100 => ServiceFault::ApiError,
            -101 => ServiceFault::NoNode,
            -102 => ServiceFault::NoAuth,
            -103 => ServiceFault::BadVersion,
            -108 => ServiceFault::NoChildrenForEphemerals,
            -110 => ServiceFault::NodeExists,
            -111 => ServiceFault::NotEmpty,
            -112 => ServiceFault::SessionExpired,
            -113 => ServiceFault::InvalidCallback,
            -114 => ServiceFault::InvalidAcl,
            -115 => ServiceFault::AuthFailed,
            -118 => ServiceFault::SessionMoved,
            -119 => ServiceFault::NotReadOnly,
            other => ServiceFault::Unrecognized(other),
        };
        Some(fault)
    }

    /// Wire value of this fault. `Unknown` has no wire value and reports `i32::MIN`.
    pub fn code(&self) -> i32 {
        match self {
            ServiceFault::SystemError => -1,
            ServiceFault::RuntimeInconsistency => -2,
            ServiceFault::DataInconsistency => -3,
            ServiceFault::ConnectionLoss => -4,
            ServiceFault::MarshallingError => -5,
            ServiceFault::Unimplemented => -6,
            ServiceFault::OperationTimeout => -7,
            ServiceFault::BadArguments => -8,
            ServiceFault::UnknownSession => -12,
            ServiceFault::NewConfigNoQuorum => -13,
            ServiceFault::ReconfigInProgress => -14,
            ServiceFault::ApiError => -100,
            ServiceFault::NoNode => -101,
            ServiceFault::NoAuth => -102,
            ServiceFault::BadVersion => -103,
            ServiceFault::NoChildrenForEphemerals => -108,
            ServiceFault::NodeExists => -110,
            ServiceFault::NotEmpty => -111,
            ServiceFault::SessionExpired => -112,
            ServiceFault::InvalidCallback => -113,
            ServiceFault::InvalidAcl => -114,
            ServiceFault::AuthFailed => -115,
            ServiceFault::SessionMoved => -118,
            ServiceFault::NotReadOnly => -119,
            ServiceFault::Unknown(_) => i32::MIN,
            ServiceFault::Unrecognized(code) => *code,
        }
    }
}

impl From<&ServiceFault> for ResultCode {
    /// Total mapping from the service taxonomy. Anything not listed is a `SystemError`.
    fn from(fault: &ServiceFault) -> Self {
        match fault {
            ServiceFault::NoNode => ResultCode::NoNode,
            ServiceFault::NodeExists => ResultCode::NodeExists,
            ServiceFault::NotEmpty => ResultCode::NotEmpty,
            ServiceFault::BadVersion => ResultCode::BadVersion,
            ServiceFault::ConnectionLoss => ResultCode::ConnectionLoss,
            ServiceFault::SessionExpired => ResultCode::SessionExpired,
            ServiceFault::SystemError => ResultCode::SystemError,
            ServiceFault::Unknown(_) => ResultCode::Unknown,
            _ => ResultCode::SystemError,
        }
    }
}

impl From<ServiceFault> for ResultCode {
    fn from(fault: ServiceFault) -> Self {
        ResultCode::from(&fault)
    }
}

/// Folds an operation outcome into a [`ResultCode`]
pub(crate) fn result_code_of<T>(outcome: &std::result::Result<T, ServiceFault>) -> ResultCode {
    match outcome {
        Ok(_) => ResultCode::Ok,
        Err(fault) => fault.into(),
    }
}
