use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_HOST;
use crate::constants::DEFAULT_REQUEST_TIMEOUT_MS;
use crate::constants::DEFAULT_SESSION_TIMEOUT_MS;
use crate::Error;
use crate::Result;

/// Session parameters handed to the transport at `connect`
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionConfig {
    /// Service endpoints, `host:port` each
    ///
    /// Default: `["127.0.0.1:2181"]`
    #[serde(default = "default_hosts")]
    pub hosts: Vec<String>,

    /// Session timeout negotiated with the service. Governs the transport's
    /// liveness detection only; the connect barrier waits without a deadline.
    ///
    /// Default: 5000ms
    #[serde(default = "default_session_timeout")]
    pub session_timeout_in_ms: u64,

    /// Upper bound for one node operation round trip
    ///
    /// Default: 10000ms
    #[serde(default = "default_request_timeout")]
    pub request_timeout_in_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            session_timeout_in_ms: default_session_timeout(),
            request_timeout_in_ms: default_request_timeout(),
        }
    }
}

impl SessionConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_in_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_in_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "session.hosts must contain at least one endpoint".into(),
            )));
        }

        for host in &self.hosts {
            validate_endpoint(host).map_err(|reason| {
                Error::Config(ConfigError::Message(format!(
                    "invalid endpoint {host:?} in session.hosts: {reason}"
                )))
            })?;
        }

        if self.session_timeout_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "session.session_timeout_in_ms must be greater than 0".into(),
            )));
        }

        if self.request_timeout_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "session.request_timeout_in_ms must be greater than 0".into(),
            )));
        }

        Ok(())
    }
}

/// Checks the `host:port` shape of an endpoint
pub fn validate_endpoint(endpoint: &str) -> std::result::Result<(), String> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| "expected host:port".to_string())?;

    if host.is_empty() {
        return Err("host is empty".into());
    }
    match port.parse::<u16>() {
        Ok(0) => Err("port must be non-zero".into()),
        Ok(_) => Ok(()),
        Err(_) => Err(format!("port {port:?} is not a number")),
    }
}

/// Splits a comma separated connect string (`"h1:2181,h2:2181"`) into endpoints
pub fn parse_connect_string(connect_string: &str) -> Vec<String> {
    connect_string
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_hosts() -> Vec<String> {
    vec![DEFAULT_HOST.to_string()]
}
fn default_session_timeout() -> u64 {
    DEFAULT_SESSION_TIMEOUT_MS
}
fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}
