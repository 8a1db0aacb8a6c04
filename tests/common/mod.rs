use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::unbounded;
use crossbeam_channel::Receiver;
use zk_connector::transport::mem::MemEnsemble;
use zk_connector::Connector;
use zk_connector::ConnectorConfig;
use zk_connector::SessionState;
use zk_connector::WatchedEvent;
use zk_connector::Watcher;

pub const HOST: &str = "127.0.0.1:2181";

pub const SESSION_TIMEOUT: Duration = Duration::from_millis(5000);

// Upper bound for a notification to cross the event thread
pub const NOTIFY_WAIT: Duration = Duration::from_secs(2);

pub fn hosts() -> Vec<String> {
    vec![HOST.to_string()]
}

pub fn ensemble() -> MemEnsemble {
    MemEnsemble::new(hosts())
}

pub async fn connected(ensemble: &MemEnsemble) -> Connector {
    let connector = Connector::new(Arc::new(ensemble.transport()), ConnectorConfig::default());
    connector
        .connect(hosts(), SESSION_TIMEOUT)
        .await
        .expect("connect against the in-memory ensemble");
    connector
}

/// Watcher forwarding every notification into a channel
pub fn recorder() -> (Arc<dyn Watcher>, Receiver<WatchedEvent>) {
    let (tx, rx) = unbounded();
    let watcher = move |event: WatchedEvent| {
        let _ = tx.send(event);
    };
    (Arc::new(watcher), rx)
}

#[allow(dead_code)]
pub async fn wait_for_state(
    connector: &Connector,
    expected: SessionState,
) {
    let deadline = tokio::time::Instant::now() + NOTIFY_WAIT;
    while connector.state() != expected {
        if tokio::time::Instant::now() > deadline {
            panic!("connector stuck in {:?}, expected {:?}", connector.state(), expected);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
