use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use wallet_core::config::IndexerConfig;
use wallet_types::{AccountId, ChainId, ChainModel, DiscoveredMultisig};

use crate::cache::{DelegateMap, DelegatedAccountsCache};
use crate::error::{SyncError, SyncResult};

/// Remote lookup of multisig accounts by signatory
#[async_trait]
pub trait MultisigSource: Send + Sync {
    async fn fetch_multisigs(&self, signatories: &HashSet<AccountId>) -> SyncResult<Vec<DiscoveredMultisig>>;
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<MultisigsData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MultisigsData {
    account_multisigs: NodeList<AccountMultisigNode>,
}

#[derive(Debug, Deserialize)]
struct NodeList<T> {
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct AccountMultisigNode {
    multisig: MultisigNode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MultisigNode {
    account_id: String,
    threshold: u16,
    signatories: NodeList<SignatoryNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatoryNode {
    signatory_id: String,
}

impl MultisigNode {
    fn into_model(self) -> SyncResult<DiscoveredMultisig> {
        let account_id = parse_account(&self.account_id)?;
        let signatories = self
            .signatories
            .nodes
            .iter()
            .map(|node| parse_account(&node.signatory_id))
            .collect::<SyncResult<Vec<_>>>()?;

        Ok(DiscoveredMultisig { account_id, threshold: self.threshold, signatories })
    }
}

fn parse_account(value: &str) -> SyncResult<AccountId> {
    AccountId::from_hex(value)
        .map_err(|e| SyncError::SerializationError(format!("Invalid account id {}: {}", value, e)))
}

fn multisigs_query(signatories: &HashSet<AccountId>) -> String {
    let mut ids: Vec<String> = signatories.iter().map(|id| format!("\"{}\"", id.to_hex())).collect();
    ids.sort();

    format!(
        r#"query {{
  accountMultisigs(filter: {{ signatory: {{ in: [{}] }} }}) {{
    nodes {{
      multisig {{
        accountId
        threshold
        signatories {{ nodes {{ signatoryId }} }}
      }}
    }}
  }}
}}"#,
        ids.join(", ")
    )
}

/// GraphQL client for the multisig indexer of one chain.
///
/// A chain without a configured indexer URL has no discoverable multisigs;
/// every lookup then answers with an empty list.
pub struct MultisigIndexerClient {
    url: Option<String>,
    http_client: HttpClient,
    max_retry_attempts: u32,
}

impl MultisigIndexerClient {
    pub fn new(url: Option<String>, config: &IndexerConfig) -> SyncResult<Self> {
        let http_client = HttpClient::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SyncError::HttpError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url,
            http_client,
            max_retry_attempts: config.max_retry_attempts.max(1),
        })
    }

    pub fn for_chain(chain: &ChainModel, config: &IndexerConfig) -> SyncResult<Self> {
        Self::new(chain.multisig_api_url().map(str::to_string), config)
    }

    async fn query(&self, url: &str, signatories: &HashSet<AccountId>) -> SyncResult<Vec<DiscoveredMultisig>> {
        let body = json!({ "query": multisigs_query(signatories) });
        let attempts = AtomicU32::new(0);

        let backoff = ExponentialBackoff {
            current_interval: Duration::from_millis(100),
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };

        let response: GraphQlResponse = retry(backoff, || async {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let exhausted = attempt >= self.max_retry_attempts;

            let transient = |error: SyncError| {
                if exhausted {
                    warn!("Indexer request failed after {} attempts: {}", attempt, error);
                    backoff::Error::Permanent(error)
                } else {
                    debug!("Indexer attempt {} failed, retrying: {}", attempt, error);
                    backoff::Error::Transient { err: error, retry_after: None }
                }
            };

            let response = self
                .http_client
                .post(url)
                .json(&body)
                .send()
                .await
                .map_err(|e| transient(SyncError::HttpError(format!("Failed to query indexer: {}", e))))?;

            let status = response.status();
            if !status.is_success() {
                let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
                let error = SyncError::IndexerError(format!("HTTP {}: {}", status, error_text));

                // Only retry on server errors (5xx)
                return Err(if status.is_server_error() {
                    transient(error)
                } else {
                    backoff::Error::Permanent(error)
                });
            }

            response.json::<GraphQlResponse>().await.map_err(|e| {
                backoff::Error::Permanent(SyncError::SerializationError(format!(
                    "Failed to parse indexer response: {}",
                    e
                )))
            })
        })
        .await?;

        if let Some(error) = response.errors.first() {
            return Err(SyncError::IndexerError(error.message.clone()));
        }

        let data = response
            .data
            .ok_or_else(|| SyncError::ProtocolError("Indexer response has no data".to_string()))?;

        let mut multisigs: Vec<DiscoveredMultisig> = Vec::new();
        for node in data.account_multisigs.nodes {
            let multisig = node.multisig.into_model()?;
            // One node per matching signatory, so the same multisig can repeat
            if !multisigs.iter().any(|known| known.account_id == multisig.account_id) {
                multisigs.push(multisig);
            }
        }

        Ok(multisigs)
    }
}

#[async_trait]
impl MultisigSource for MultisigIndexerClient {
    async fn fetch_multisigs(&self, signatories: &HashSet<AccountId>) -> SyncResult<Vec<DiscoveredMultisig>> {
        let Some(url) = self.url.as_deref() else {
            debug!("No multisig indexer configured, nothing to discover");
            return Ok(Vec::new());
        };

        if signatories.is_empty() {
            return Ok(Vec::new());
        }

        self.query(url, signatories).await
    }
}

/// Multisig accounts of one chain, discovered through an indexer and cached per signatory
pub struct MultisigAccountsRepository {
    chain_id: ChainId,
    source: Arc<dyn MultisigSource>,
    cache: DelegatedAccountsCache<DiscoveredMultisig>,
}

impl MultisigAccountsRepository {
    pub fn new(chain_id: ChainId, source: Arc<dyn MultisigSource>) -> Self {
        Self {
            chain_id,
            source,
            cache: DelegatedAccountsCache::new(),
        }
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    /// Multisigs each signatory takes part in, keyed by signatory
    pub async fn fetch_delegates(
        &self,
        signatories: &HashSet<AccountId>,
    ) -> SyncResult<DelegateMap<DiscoveredMultisig>> {
        let source = self.source.clone();
        let result = self
            .cache
            .fetch_with(signatories, |missing| async move { source.fetch_multisigs(&missing).await })
            .await?;

        info!(
            "Resolved multisigs for {} signatories on {}",
            result.len(),
            self.chain_id
        );

        Ok(result)
    }

    pub fn cached(&self) -> DelegateMap<DiscoveredMultisig> {
        self.cache.snapshot()
    }
}
