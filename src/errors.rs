//! Connector Error Hierarchy
//!
//! Errors are split by who can act on them:
//! - setup faults ([`SetupError`]) end a single `connect` attempt,
//! - usability faults ([`Error::NotConnected`]) are recoverable by connecting again,
//! - service faults never surface here; node operations normalize them into
//!   [`crate::ResultCode`] values.

use config::ConfigError;

use crate::SessionState;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The session could not be established or the wait for it was interrupted
    #[error(transparent)]
    ConnectionSetupFailed(#[from] SetupError),

    /// No session in `Connected` state is held by the connector
    #[error("Coordination session is not connected")]
    NotConnected,

    /// `connect` was called while a live session is still held
    #[error("A session is already open on this connector (state: {0:?})")]
    AlreadyConnected(SessionState),

    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// Transport could not open a session against any endpoint
    #[error("Connection setup failed: {0}")]
    Transport(#[from] TransportError),

    /// Waiting on the connection barrier was cancelled by the caller
    #[error("Connection setup interrupted while waiting for the session to synchronize")]
    Interrupted,

    /// `connect` was called with an empty endpoint list
    #[error("Connection setup failed: no endpoints supplied")]
    NoEndpoints,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// None of the endpoints accepted the session
    #[error("Service unreachable at {endpoints:?}")]
    Unreachable { endpoints: Vec<String> },

    /// Malformed `host:port` endpoint
    #[error("Invalid endpoint format: {0}")]
    InvalidEndpoint(String),

    /// Background notification thread could not be started
    #[error("Event thread failed to start: {0}")]
    EventThread(#[from] std::io::Error),
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::ConnectionSetupFailed(SetupError::Transport(err))
    }
}
