use std::sync::{Arc, Weak};
use std::time::Duration;

use mockito::{Matcher, Server};
use serde_json::json;
use wallet_core::config::ConnectionConfig;
use wallet_core::DispatchQueue;
use wallet_types::{ChainId, ChainModel, ChainNode};

use super::mocks::RecordingSubscriber;
use crate::connection::{ChainConnection, ConnectionState, ConnectionStateDelegate};
use crate::error::ConnectionError;
use crate::factory::{ConnectionFactory, JsonRpcConnectionFactory};
use crate::pool::{ConnectionPool, ConnectionStateSubscriber};

fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        request_timeout_seconds: 2,
        reconnect_initial_delay_ms: 10,
        reconnect_max_delay_ms: 50,
    }
}

async fn wait_for_state(connection: &Arc<dyn ChainConnection>, expected: ConnectionState) {
    for _ in 0..200 {
        if connection.state() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("connection never reached {:?}, stuck at {:?}", expected, connection.state());
}

#[tokio::test]
async fn test_factory_rejects_chain_without_usable_urls() {
    let factory = JsonRpcConnectionFactory::new(fast_config()).unwrap();
    let chain = ChainModel::new(
        "broken",
        "Broken",
        vec![ChainNode { url: "not a url".into(), name: "bad".into(), order: 0 }],
    );

    let queue = DispatchQueue::new("ui");
    let pool = ConnectionPool::new(Arc::new(factory), queue);
    let result = pool.setup_connection(&chain);

    assert!(matches!(result, Err(ConnectionError::UnknownError(_))));
}

#[tokio::test]
async fn test_connects_and_forwards_requests() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut server = Server::new_async().await;

    let _health = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({ "method": "system_health" })))
        .with_header("content-type", "application/json")
        .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"peers":4,"isSyncing":false}}"#)
        .create_async()
        .await;

    let _block = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({ "method": "chain_getBlockHash" })))
        .with_header("content-type", "application/json")
        .with_body(r#"{"jsonrpc":"2.0","id":2,"result":"0x1234"}"#)
        .create_async()
        .await;

    let queue = DispatchQueue::new("ui");
    let factory = JsonRpcConnectionFactory::new(fast_config()).unwrap();
    let pool = ConnectionPool::new(Arc::new(factory), queue.clone());
    let chain = ChainModel::new(
        "westend",
        "Westend",
        vec![ChainNode { url: server.url(), name: "local".into(), order: 0 }],
    );

    let subscriber = Arc::new(RecordingSubscriber::default());
    let handle: Arc<dyn ConnectionStateSubscriber> = subscriber.clone();
    pool.subscribe(&handle, &ChainId::new("westend"));

    let connection = pool.setup_connection(&chain).unwrap();
    wait_for_state(&connection, ConnectionState::Connected).await;

    let hash = connection.send("chain_getBlockHash", json!([0])).await.unwrap();
    assert_eq!(hash, json!("0x1234"));

    // Let the delegate drain task and the queue catch up
    tokio::time::sleep(Duration::from_millis(50)).await;
    queue.flush().await;

    let states = subscriber.states();
    assert_eq!(states.first(), Some(&ConnectionState::NotConnected));
    assert_eq!(states.last(), Some(&ConnectionState::Connected));
}

#[tokio::test]
async fn test_rpc_error_is_surfaced() {
    let mut server = Server::new_async().await;

    let _health = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({ "method": "system_health" })))
        .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
        .create_async()
        .await;

    let _failing = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({ "method": "author_submitExtrinsic" })))
        .with_body(r#"{"jsonrpc":"2.0","id":2,"error":{"code":1010,"message":"Invalid Transaction"}}"#)
        .create_async()
        .await;

    let factory = JsonRpcConnectionFactory::new(fast_config()).unwrap();
    let chain = ChainModel::new(
        "westend",
        "Westend",
        vec![ChainNode { url: server.url(), name: "local".into(), order: 0 }],
    );
    let queue = DispatchQueue::new("ui");
    let pool = ConnectionPool::new(Arc::new(factory), queue);

    let connection = pool.setup_connection(&chain).unwrap();
    wait_for_state(&connection, ConnectionState::Connected).await;

    let result = connection.send("author_submitExtrinsic", json!(["0x00"])).await;
    match result {
        Err(ConnectionError::RpcError { code, message }) => {
            assert_eq!(code, 1010);
            assert_eq!(message, "Invalid Transaction");
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(connection.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_unreachable_nodes_wait_for_reconnection() {
    let factory = JsonRpcConnectionFactory::new(fast_config()).unwrap();
    let queue = DispatchQueue::new("ui");
    let pool = ConnectionPool::new(Arc::new(factory), queue);
    let chain = ChainModel::new(
        "offline",
        "Offline",
        vec![ChainNode { url: "http://127.0.0.1:9".into(), name: "discard".into(), order: 0 }],
    );

    let connection = pool.setup_connection(&chain).unwrap();
    wait_for_state(&connection, ConnectionState::WaitingReconnection).await;

    let result = connection.send("system_health", json!([])).await;
    assert!(matches!(result, Err(ConnectionError::NotConnected)));

    connection.disconnect();
    assert_eq!(connection.state(), ConnectionState::NotConnected);
}

#[tokio::test]
async fn test_created_connection_starts_idle() {
    let factory = JsonRpcConnectionFactory::new(fast_config()).unwrap();
    let chain = ChainModel::new(
        "rococo",
        "Rococo",
        vec![ChainNode { url: "http://127.0.0.1:9".into(), name: "discard".into(), order: 0 }],
    );

    let queue = DispatchQueue::new("ui");
    let pool = ConnectionPool::new(Arc::new(JsonRpcConnectionFactory::new(fast_config()).unwrap()), queue);
    let delegate: Weak<dyn ConnectionStateDelegate> = Arc::<ConnectionPool>::downgrade(&pool);

    let connection = factory.create_connection(&chain, delegate).unwrap();
    assert_eq!(connection.state(), ConnectionState::NotConnected);
}
