//! Client-side connector to a hierarchical, watch-based coordination service.
//!
//! The [`Connector`] owns one session at a time and blocks `connect` on a
//! [`ConnectionBarrier`] until the service synchronizes the session. Session
//! notifications flow through the [`WatchDispatcher`]; node operations
//! normalize service faults into [`ResultCode`] and [`QueryResult`] values.
//!
//! ```ignore
//! let ensemble = MemEnsemble::new(vec!["127.0.0.1:2181".into()]);
//! let connector = Connector::new(Arc::new(ensemble.transport()), ConnectorConfig::default());
//! connector.connect_with_config().await?;
//! assert_eq!(connector.create("/a", None, CreateMode::Persistent).await?, ResultCode::Ok);
//! ```

mod barrier;
mod config;
mod connector;
mod errors;
mod node;
mod result_code;
mod session;
mod watch;

pub mod constants;
pub mod metrics;
pub mod transport;

pub use barrier::*;
pub use config::*;
pub use connector::*;
pub use errors::*;
pub use node::*;
pub use result_code::*;
pub use session::*;
pub use watch::*;
