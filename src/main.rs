use std::sync::Arc;

use bytes::Bytes;
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use zk_connector::metrics::gather_text;
use zk_connector::metrics::register_custom_metrics;
use zk_connector::parse_connect_string;
use zk_connector::transport::mem::MemEnsemble;
use zk_connector::Connector;
use zk_connector::ConnectorConfig;
use zk_connector::CreateMode;
use zk_connector::Result;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let config = ConnectorConfig::new()?.validate()?;

    init_observability();

    let registry = Registry::new();
    if let Err(e) = register_custom_metrics(&registry) {
        error!("Failed to register metrics: {:?}", e);
    }

    // Optional connect string ("h1:2181,h2:2181") replaces the configured hosts
    let hosts = std::env::args()
        .nth(1)
        .map(|connect_string| parse_connect_string(&connect_string))
        .unwrap_or_else(|| config.session.hosts.clone());

    // In-process ensemble answering on those hosts
    let ensemble = MemEnsemble::new(hosts.clone());
    let connector = Connector::new(Arc::new(ensemble.transport()), config.clone());

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl+C detected.");
                cancel.cancel();
            }
        }
    });

    connector
        .connect_with_cancel(hosts, config.session.session_timeout(), cancel)
        .await?;

    walkthrough(&connector).await?;

    connector.close().await?;

    println!("{}", gather_text(&registry));
    Ok(())
}

async fn walkthrough(connector: &Connector) -> Result<()> {
    let code = connector
        .create("/a", Some(Bytes::from_static(b"hello")), CreateMode::Persistent)
        .await?;
    info!("create /a -> {}", code);

    let code = connector.create("/a", None, CreateMode::Persistent).await?;
    info!("create /a again -> {}", code);

    match connector.exists("/a", None).await?.found() {
        Some(stat) => info!("exists /a -> version {}, {} bytes", stat.version, stat.data_length),
        None => warn!("exists /a -> absent"),
    }

    let seq = connector
        .create_and_get_path("/a/item-", None, CreateMode::EphemeralSequential)
        .await?;
    info!("create /a/item- -> {:?}", seq);

    let children = connector.get_children("/a", None).await?;
    info!("children of /a -> {:?}", children);

    info!("delete /a -> {}", connector.delete("/a", None).await?);
    if let Ok(path) = seq {
        info!("delete {} -> {}", path, connector.delete(&path, Some(0)).await?);
    }
    info!("delete /a -> {}", connector.delete("/a", None).await?);

    info!("exists /a -> {:?}", connector.exists("/a", None).await?);
    Ok(())
}

fn init_observability() {
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));
    tracing_subscriber::registry().with(base_subscriber).init();
}
