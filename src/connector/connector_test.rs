use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

use super::Connector;
use crate::transport::mem::MemEnsemble;
use crate::transport::MockSessionHandle;
use crate::transport::MockTransport;
use crate::transport::SessionHandle;
use crate::Acl;
use crate::AclPolicy;
use crate::ConnectorConfig;
use crate::CreateMode;
use crate::Error;
use crate::KeeperState;
use crate::QueryResult;
use crate::ResultCode;
use crate::ServiceFault;
use crate::SessionState;
use crate::SetupError;
use crate::TransportError;
use crate::WatchedEvent;

const HOST: &str = "127.0.0.1:2181";
const SESSION_TIMEOUT: Duration = Duration::from_millis(5000);

fn hosts() -> Vec<String> {
    vec![HOST.to_string()]
}

fn mock_handle() -> MockSessionHandle {
    let mut handle = MockSessionHandle::new();
    handle.expect_session_id().return_const(0x42u64);
    handle
}

/// Transport whose `open` synchronizes the session immediately
fn synced_transport(handle: MockSessionHandle) -> MockTransport {
    let handle: Arc<dyn SessionHandle> = Arc::new(handle);
    let mut transport = MockTransport::new();
    transport.expect_open().returning(move |_, _, sink| {
        sink.process(WatchedEvent::session(KeeperState::SyncConnected));
        Ok(handle.clone())
    });
    transport
}

async fn connected(handle: MockSessionHandle) -> Connector {
    connected_with(handle, ConnectorConfig::default()).await
}

async fn connected_with(
    handle: MockSessionHandle,
    config: ConnectorConfig,
) -> Connector {
    let connector = Connector::new(Arc::new(synced_transport(handle)), config);
    connector.connect(hosts(), SESSION_TIMEOUT).await.unwrap();
    connector
}

fn mem_connector(ensemble: &MemEnsemble) -> Connector {
    Connector::new(Arc::new(ensemble.transport()), ConnectorConfig::default())
}

async fn wait_for_state(
    connector: &Connector,
    expected: SessionState,
) {
    for _ in 0..400 {
        if connector.state() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("connector never reached {expected:?}, last {:?}", connector.state());
}

#[tokio::test]
async fn operations_before_connect_are_not_connected() {
    let connector = Connector::new(Arc::new(MockTransport::new()), ConnectorConfig::default());

    assert!(matches!(connector.get_session(), Err(Error::NotConnected)));
    assert_eq!(connector.state(), SessionState::Closed);
    assert!(matches!(
        connector.exists("/a", None).await,
        Err(Error::NotConnected)
    ));
    assert!(matches!(
        connector.create("/a", None, CreateMode::Persistent).await,
        Err(Error::NotConnected)
    ));
    assert!(matches!(
        connector.delete("/a", None).await,
        Err(Error::NotConnected)
    ));
}

#[tokio::test]
#[traced_test]
async fn connect_returns_once_session_is_synchronized() {
    let connector = connected(mock_handle()).await;

    assert_eq!(connector.state(), SessionState::Connected);
    assert_eq!(connector.session_id(), Some(0x42));
    assert_eq!(connector.get_session().unwrap().session_id(), 0x42);
    assert!(logs_contain("connected"));
}

#[tokio::test]
async fn connect_fails_when_transport_cannot_open() {
    let mut transport = MockTransport::new();
    transport.expect_open().times(1).returning(|endpoints, _, _| {
        Err(TransportError::Unreachable { endpoints })
    });
    let connector = Connector::new(Arc::new(transport), ConnectorConfig::default());

    let result = connector.connect(hosts(), SESSION_TIMEOUT).await;

    assert!(matches!(
        result,
        Err(Error::ConnectionSetupFailed(SetupError::Transport(
            TransportError::Unreachable { .. }
        )))
    ));
    assert!(matches!(connector.get_session(), Err(Error::NotConnected)));
}

#[tokio::test]
async fn connect_without_endpoints_is_rejected() {
    let mut transport = MockTransport::new();
    transport.expect_open().never();
    let connector = Connector::new(Arc::new(transport), ConnectorConfig::default());

    let result = connector.connect(vec![], SESSION_TIMEOUT).await;

    assert!(matches!(
        result,
        Err(Error::ConnectionSetupFailed(SetupError::NoEndpoints))
    ));
}

#[tokio::test]
#[traced_test]
async fn cancelled_connect_discards_half_open_session() {
    let mut handle = mock_handle();
    handle.expect_close().times(1).returning(|| Ok(()));
    let handle: Arc<dyn SessionHandle> = Arc::new(handle);

    let mut transport = MockTransport::new();
    // Never synchronizes.
    transport.expect_open().returning(move |_, _, _| Ok(handle.clone()));
    let connector = Connector::new(Arc::new(transport), ConnectorConfig::default());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = connector.connect_with_cancel(hosts(), SESSION_TIMEOUT, cancel).await;

    assert!(matches!(
        result,
        Err(Error::ConnectionSetupFailed(SetupError::Interrupted))
    ));
    assert_eq!(connector.state(), SessionState::Closed);
    assert!(matches!(connector.get_session(), Err(Error::NotConnected)));
    assert!(logs_contain("setup failed"));
}

#[tokio::test]
async fn second_connect_on_live_session_is_rejected() {
    let connector = connected(mock_handle()).await;

    let result = connector.connect(hosts(), SESSION_TIMEOUT).await;

    assert!(matches!(
        result,
        Err(Error::AlreadyConnected(SessionState::Connected))
    ));
    assert!(connector.get_session().is_ok());
}

#[tokio::test]
async fn close_without_session_is_not_connected() {
    let connector = Connector::new(Arc::new(MockTransport::new()), ConnectorConfig::default());
    assert!(matches!(connector.close().await, Err(Error::NotConnected)));
}

#[tokio::test]
async fn close_releases_session_and_fails_fast_afterwards() {
    let mut handle = mock_handle();
    handle.expect_close().times(1).returning(|| Ok(()));
    let connector = connected(handle).await;

    connector.close().await.unwrap();

    assert_eq!(connector.state(), SessionState::Closed);
    assert!(matches!(connector.get_session(), Err(Error::NotConnected)));
    assert!(matches!(
        connector.get_children("/", None).await,
        Err(Error::NotConnected)
    ));
    assert!(matches!(connector.close().await, Err(Error::NotConnected)));
}

#[tokio::test]
async fn close_reporting_a_fault_still_releases_session() {
    let mut handle = mock_handle();
    handle
        .expect_close()
        .times(1)
        .returning(|| Err(ServiceFault::ConnectionLoss));
    let connector = connected(handle).await;

    assert!(connector.close().await.is_ok());
    assert!(matches!(connector.get_session(), Err(Error::NotConnected)));
}

#[tokio::test]
async fn exists_distinguishes_found_absent_and_failed() {
    let mut handle = mock_handle();
    let mut seq = mockall::Sequence::new();
    handle
        .expect_exists()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(Some(crate::Stat::default())));
    handle
        .expect_exists()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(None));
    handle
        .expect_exists()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Err(ServiceFault::ConnectionLoss));
    let connector = connected(handle).await;

    assert!(connector.exists("/a", None).await.unwrap().is_found());
    assert_eq!(connector.exists("/a", None).await.unwrap(), QueryResult::NotFound);
    assert_eq!(
        connector.exists("/a", None).await.unwrap(),
        QueryResult::Failed(ServiceFault::ConnectionLoss)
    );
}

#[tokio::test]
#[traced_test]
async fn get_children_failure_is_logged_and_reported() {
    let mut handle = mock_handle();
    handle
        .expect_get_children()
        .returning(|path, _| match path {
            "/missing" => Err(ServiceFault::NoNode),
            "/jobs" => Ok(vec!["a".into(), "b".into()]),
            _ => Err(ServiceFault::NoAuth),
        });
    let connector = connected(handle).await;

    assert_eq!(
        connector.get_children("/jobs", None).await.unwrap(),
        QueryResult::Found(vec!["a".to_string(), "b".to_string()])
    );
    assert_eq!(
        connector.get_children("/missing", None).await.unwrap(),
        QueryResult::NotFound
    );
    assert_eq!(
        connector.get_children("/secret", None).await.unwrap(),
        QueryResult::Failed(ServiceFault::NoAuth)
    );
    assert!(logs_contain("query on /secret failed"));
}

#[tokio::test]
async fn create_folds_service_faults_into_result_codes() {
    let mut handle = mock_handle();
    handle.expect_create().returning(|path, _, _, _| match path {
        "/new" => Ok("/new".into()),
        "/taken" => Err(ServiceFault::NodeExists),
        "/lost" => Err(ServiceFault::Unknown("reply lost".into())),
        "/odd" => Err(ServiceFault::Unrecognized(-999)),
        _ => Err(ServiceFault::NoNode),
    });
    let connector = connected(handle).await;

    let mode = CreateMode::Persistent;
    assert_eq!(connector.create("/new", None, mode).await.unwrap(), ResultCode::Ok);
    assert_eq!(
        connector.create("/taken", None, mode).await.unwrap(),
        ResultCode::NodeExists
    );
    assert_eq!(
        connector.create("/lost", None, mode).await.unwrap(),
        ResultCode::Unknown
    );
    assert_eq!(
        connector.create("/odd", None, mode).await.unwrap(),
        ResultCode::SystemError
    );
    assert_eq!(
        connector.create("/a/b", None, mode).await.unwrap(),
        ResultCode::NoNode
    );
}

#[tokio::test]
async fn create_attaches_configured_acl() {
    let mut handle = mock_handle();
    handle
        .expect_create()
        .withf(|path, data, acl, mode| {
            path == "/ro"
                && data.as_deref() == Some(b"v".as_slice())
                && *acl == Acl::read_unsafe()
                && *mode == CreateMode::Ephemeral
        })
        .times(1)
        .returning(|path, _, _, _| Ok(path.to_string()));
    handle
        .expect_create()
        .withf(|_, _, acl, _| *acl == Acl::creator_all())
        .times(1)
        .returning(|path, _, _, _| Ok(path.to_string()));

    let mut config = ConnectorConfig::default();
    config.acl.policy = AclPolicy::ReadUnsafe;
    let connector = connected_with(handle, config).await;

    let code = connector
        .create("/ro", Some(Bytes::from_static(b"v")), CreateMode::Ephemeral)
        .await
        .unwrap();
    assert_eq!(code, ResultCode::Ok);

    let code = connector
        .create_with_acl("/mine", None, CreateMode::Persistent, Acl::creator_all())
        .await
        .unwrap();
    assert_eq!(code, ResultCode::Ok);
}

#[tokio::test]
async fn delete_without_version_is_unconditional() {
    let mut handle = mock_handle();
    handle
        .expect_delete()
        .withf(|path, version| path == "/a" && *version == -1)
        .times(2)
        .returning(|_, _| Ok(()));
    handle
        .expect_delete()
        .withf(|_, version| *version == 3)
        .times(1)
        .returning(|_, _| Err(ServiceFault::BadVersion));
    let connector = connected(handle).await;

    assert_eq!(connector.delete("/a", None).await.unwrap(), ResultCode::Ok);
    assert_eq!(connector.delete("/a", Some(-1)).await.unwrap(), ResultCode::Ok);
    assert_eq!(
        connector.delete("/a", Some(3)).await.unwrap(),
        ResultCode::BadVersion
    );
}

#[tokio::test]
async fn create_and_get_path_returns_sequential_name() {
    let ensemble = MemEnsemble::new(hosts());
    let connector = mem_connector(&ensemble);
    connector.connect_with_config().await.unwrap();

    assert_eq!(
        connector.create("/queue", None, CreateMode::Persistent).await.unwrap(),
        ResultCode::Ok
    );
    let first = connector
        .create_and_get_path("/queue/job-", None, CreateMode::PersistentSequential)
        .await
        .unwrap();
    let missing = connector
        .create_and_get_path("/nope/job-", None, CreateMode::PersistentSequential)
        .await
        .unwrap();

    assert_eq!(first, Ok("/queue/job-0000000000".to_string()));
    assert_eq!(missing, Err(ResultCode::NoNode));
}

#[tokio::test]
async fn slow_request_times_out_as_system_error() {
    let ensemble = MemEnsemble::new(hosts());
    let mut config = ConnectorConfig::default();
    config.session.request_timeout_in_ms = 20;
    let connector = Connector::new(Arc::new(ensemble.transport()), config);
    connector.connect(hosts(), SESSION_TIMEOUT).await.unwrap();

    ensemble.set_request_delay(Duration::from_millis(500));

    assert_eq!(
        connector.create("/slow", None, CreateMode::Persistent).await.unwrap(),
        ResultCode::SystemError
    );
    assert_eq!(
        connector.exists("/slow", None).await.unwrap(),
        QueryResult::Failed(ServiceFault::OperationTimeout)
    );
    ensemble.set_request_delay(Duration::ZERO);
    assert_eq!(connector.exists("/slow", None).await.unwrap(), QueryResult::NotFound);
}

#[tokio::test]
#[traced_test]
async fn disconnected_session_is_not_usable_until_reconnected() {
    let ensemble = MemEnsemble::new(hosts());
    let connector = mem_connector(&ensemble);
    connector.connect(hosts(), SESSION_TIMEOUT).await.unwrap();
    let id = connector.session_id().unwrap();

    ensemble.disconnect(id);
    wait_for_state(&connector, SessionState::Disconnected).await;
    assert!(matches!(connector.get_session(), Err(Error::NotConnected)));
    assert!(matches!(
        connector.connect(hosts(), SESSION_TIMEOUT).await,
        Err(Error::AlreadyConnected(SessionState::Disconnected))
    ));

    ensemble.reconnect(id);
    wait_for_state(&connector, SessionState::Connected).await;
    assert!(connector.get_session().is_ok());
}

#[tokio::test]
async fn expired_session_is_replaced_by_next_connect() {
    let ensemble = MemEnsemble::new(hosts());
    let connector = mem_connector(&ensemble);
    connector.connect(hosts(), SESSION_TIMEOUT).await.unwrap();
    let first = connector.session_id().unwrap();

    ensemble.expire(first);
    wait_for_state(&connector, SessionState::Expired).await;
    assert!(matches!(connector.get_session(), Err(Error::NotConnected)));

    connector.connect(hosts(), SESSION_TIMEOUT).await.unwrap();
    let second = connector.session_id().unwrap();

    assert_ne!(first, second);
    assert_eq!(connector.state(), SessionState::Connected);
    assert_eq!(ensemble.session_ids(), vec![second]);
}

#[tokio::test]
async fn close_interrupts_a_pending_connect() {
    let ensemble = MemEnsemble::new(hosts());
    ensemble.set_auto_handshake(false);
    let connector = Arc::new(mem_connector(&ensemble));

    let pending = {
        let connector = connector.clone();
        tokio::spawn(async move { connector.connect(hosts(), SESSION_TIMEOUT).await })
    };
    wait_for_state(&connector, SessionState::Connecting).await;
    while connector.session_id().is_none() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    connector.close().await.unwrap();

    let result = pending.await.unwrap();
    assert!(matches!(
        result,
        Err(Error::ConnectionSetupFailed(SetupError::Interrupted))
    ));
    assert!(ensemble.session_ids().is_empty());
}

#[tokio::test]
async fn held_handshake_keeps_connect_waiting() {
    let ensemble = MemEnsemble::new(hosts());
    ensemble.set_auto_handshake(false);
    let connector = Arc::new(mem_connector(&ensemble));

    let pending = {
        let connector = connector.clone();
        tokio::spawn(async move { connector.connect(hosts(), SESSION_TIMEOUT).await })
    };
    while connector.session_id().is_none() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pending.is_finished());
    assert!(matches!(connector.get_session(), Err(Error::NotConnected)));

    let id = connector.session_id().unwrap();
    // Duplicate handshakes release the barrier once.
    ensemble.complete_handshake(id);
    ensemble.send_session_event(id, KeeperState::SyncConnected);

    pending.await.unwrap().unwrap();
    assert_eq!(connector.state(), SessionState::Connected);
}

#[tokio::test]
async fn close_during_pending_connect_closes_handle_once() {
    let mut handle = mock_handle();
    handle.expect_close().times(1).returning(|| Ok(()));
    let handle: Arc<dyn SessionHandle> = Arc::new(handle);

    let mut transport = MockTransport::new();
    transport.expect_open().returning(move |_, _, _| Ok(handle.clone()));
    let connector = Arc::new(Connector::new(Arc::new(transport), ConnectorConfig::default()));

    let pending = {
        let connector = connector.clone();
        tokio::spawn(async move { connector.connect(hosts(), SESSION_TIMEOUT).await })
    };
    while connector.session_id().is_none() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    connector.close().await.unwrap();

    // A second close of the handle would panic inside the connect task.
    let result = pending.await.unwrap();
    assert!(matches!(
        result,
        Err(Error::ConnectionSetupFailed(SetupError::Interrupted))
    ));
    assert_eq!(connector.state(), SessionState::Closed);
}

#[tokio::test]
#[traced_test]
async fn dropped_connector_releases_its_session() {
    let ensemble = MemEnsemble::new(hosts());
    let connector = mem_connector(&ensemble);
    connector.connect(hosts(), SESSION_TIMEOUT).await.unwrap();
    assert_eq!(
        connector.create("/eph", None, CreateMode::Ephemeral).await.unwrap(),
        ResultCode::Ok
    );

    drop(connector);

    for _ in 0..400 {
        if ensemble.session_ids().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(ensemble.session_ids().is_empty());
    assert_eq!(ensemble.node_data("/eph"), None);
    assert_eq!(ensemble.node_count(), 1);
    assert!(logs_contain("closing in background"));
}

#[tokio::test]
async fn failed_query_reports_failure_and_rejected_one_leaves_no_watch() {
    let ensemble = MemEnsemble::new(hosts());
    let mut config = ConnectorConfig::default();
    config.session.request_timeout_in_ms = 20;
    let connector = Connector::new(Arc::new(ensemble.transport()), config);
    connector.connect(hosts(), SESSION_TIMEOUT).await.unwrap();
    let watcher = |_event: WatchedEvent| {};

    ensemble.inject_fault(ServiceFault::ConnectionLoss);
    assert_eq!(
        connector.exists("/w", Some(Arc::new(watcher))).await.unwrap(),
        QueryResult::Failed(ServiceFault::ConnectionLoss)
    );
    assert_eq!(ensemble.watch_count(), 0);

    // Abandoned by the caller: reported as a failure, watch state unspecified.
    ensemble.set_request_delay(Duration::from_millis(500));
    assert_eq!(
        connector.exists("/w", Some(Arc::new(watcher))).await.unwrap(),
        QueryResult::Failed(ServiceFault::OperationTimeout)
    );
    ensemble.set_request_delay(Duration::ZERO);

    assert_eq!(
        connector.exists("/w", Some(Arc::new(watcher))).await.unwrap(),
        QueryResult::NotFound
    );
    assert_eq!(ensemble.watch_count(), 1);
}
