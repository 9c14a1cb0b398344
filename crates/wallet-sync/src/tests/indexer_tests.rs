use std::sync::Arc;

use mockito::{Matcher, Server};
use serde_json::json;
use wallet_core::config::IndexerConfig;
use wallet_types::{ChainModel, ChainNode};

use super::mocks::{account, ids};
use crate::error::SyncError;
use crate::multisig::{MultisigAccountsRepository, MultisigIndexerClient, MultisigSource};

fn config(max_retry_attempts: u32) -> IndexerConfig {
    IndexerConfig { request_timeout_seconds: 5, max_retry_attempts }
}

fn multisig_node(id: u8, threshold: u16, signatories: &[u8]) -> serde_json::Value {
    json!({
        "multisig": {
            "accountId": account(id).to_hex(),
            "threshold": threshold,
            "signatories": {
                "nodes": signatories
                    .iter()
                    .map(|byte| json!({ "signatoryId": account(*byte).to_hex() }))
                    .collect::<Vec<_>>()
            }
        }
    })
}

#[tokio::test]
async fn test_parses_indexer_response() {
    let mut server = Server::new_async().await;
    let body = json!({
        "data": {
            "accountMultisigs": {
                "nodes": [
                    multisig_node(100, 2, &[1, 2, 3]),
                    // Matched through the second signatory as well
                    multisig_node(100, 2, &[1, 2, 3]),
                    multisig_node(101, 1, &[2, 4]),
                ]
            }
        }
    });

    let mock = server
        .mock("POST", "/")
        .match_body(Matcher::Regex("accountMultisigs".into()))
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .expect(1)
        .create_async()
        .await;

    let client = MultisigIndexerClient::new(Some(server.url()), &config(3)).unwrap();
    let multisigs = client.fetch_multisigs(&ids(&[1, 2])).await.unwrap();

    mock.assert_async().await;
    assert_eq!(multisigs.len(), 2);
    assert_eq!(multisigs[0].account_id, account(100));
    assert_eq!(multisigs[0].threshold, 2);
    assert_eq!(multisigs[0].signatories, vec![account(1), account(2), account(3)]);
    assert_eq!(multisigs[1].account_id, account(101));
}

#[tokio::test]
async fn test_query_lists_requested_signatories() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_body(Matcher::Regex(account(7).to_hex()))
        .with_body(r#"{"data":{"accountMultisigs":{"nodes":[]}}}"#)
        .expect(1)
        .create_async()
        .await;

    let client = MultisigIndexerClient::new(Some(server.url()), &config(1)).unwrap();
    let multisigs = client.fetch_multisigs(&ids(&[7])).await.unwrap();

    mock.assert_async().await;
    assert!(multisigs.is_empty());
}

#[tokio::test]
async fn test_missing_url_yields_empty_set() {
    let chain = ChainModel::new(
        "westend",
        "Westend",
        vec![ChainNode { url: "https://westend.example".into(), name: "main".into(), order: 0 }],
    );
    let client = MultisigIndexerClient::for_chain(&chain, &config(3)).unwrap();

    let multisigs = client.fetch_multisigs(&ids(&[1])).await.unwrap();

    assert!(multisigs.is_empty());
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .with_status(503)
        .with_body("overloaded")
        .expect(3)
        .create_async()
        .await;

    let client = MultisigIndexerClient::new(Some(server.url()), &config(3)).unwrap();
    let result = client.fetch_multisigs(&ids(&[1])).await;

    mock.assert_async().await;
    assert!(matches!(result, Err(SyncError::IndexerError(_))));
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .with_status(400)
        .with_body("bad query")
        .expect(1)
        .create_async()
        .await;

    let client = MultisigIndexerClient::new(Some(server.url()), &config(3)).unwrap();
    let result = client.fetch_multisigs(&ids(&[1])).await;

    mock.assert_async().await;
    assert!(matches!(result, Err(SyncError::IndexerError(_))));
}

#[tokio::test]
async fn test_graphql_errors_are_surfaced() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/")
        .with_body(r#"{"data":null,"errors":[{"message":"Cannot query field"}]}"#)
        .create_async()
        .await;

    let client = MultisigIndexerClient::new(Some(server.url()), &config(1)).unwrap();
    let result = client.fetch_multisigs(&ids(&[1])).await;

    match result {
        Err(SyncError::IndexerError(message)) => assert_eq!(message, "Cannot query field"),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_repository_queries_indexer_once_per_signatory() {
    let mut server = Server::new_async().await;
    let body = json!({
        "data": { "accountMultisigs": { "nodes": [multisig_node(100, 2, &[1, 2])] } }
    });
    let mock = server
        .mock("POST", "/")
        .with_body(body.to_string())
        .expect(1)
        .create_async()
        .await;

    let chain = ChainModel::new("polkadot", "Polkadot", Vec::new()).with_multisig_api(server.url());
    let client = MultisigIndexerClient::for_chain(&chain, &config(1)).unwrap();
    let repository = MultisigAccountsRepository::new(chain.chain_id.clone(), Arc::new(client));

    let first = repository.fetch_delegates(&ids(&[1, 2])).await.unwrap();
    let second = repository.fetch_delegates(&ids(&[2])).await.unwrap();

    mock.assert_async().await;
    assert_eq!(first[&account(1)].len(), 1);
    assert_eq!(second[&account(2)][0].account_id, account(100));
}
