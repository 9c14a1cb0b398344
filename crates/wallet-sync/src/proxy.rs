use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use wallet_connection::ChainConnection;
use wallet_core::{CoderFactory, RuntimeCodingService, StoragePath};
use wallet_types::{AccountId, ChainId, DiscoveredProxy, ProxyType};

use crate::cache::{DelegateMap, DelegateRecord, DelegatedAccountsCache};
use crate::error::{SyncError, SyncResult};

const KEYS_PAGE_SIZE: u32 = 1000;

/// Read access to the chain's proxy registry
#[async_trait]
pub trait ProxyStorageSource: Send + Sync {
    /// Every proxy grant, read at `block_hash` or at the best block when `None`
    async fn fetch_proxies(&self, block_hash: Option<&str>) -> SyncResult<Vec<DiscoveredProxy>>;
}

/// One entry of the `Proxy.Proxies` value as produced by the runtime decoder
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProxyDefinition {
    delegate: String,
    proxy_type: String,
    delay: u32,
}

#[derive(Debug, Deserialize)]
struct StorageChangeSet {
    changes: Vec<(String, Option<String>)>,
}

fn decode_hex(value: &str) -> SyncResult<Vec<u8>> {
    hex::decode(value.strip_prefix("0x").unwrap_or(value))
        .map_err(|e| SyncError::SerializationError(format!("Invalid hex {}: {}", value, e)))
}

fn decode_entry(
    path: &StoragePath,
    coder: &dyn CoderFactory,
    key: &str,
    value: &str,
) -> SyncResult<Vec<DiscoveredProxy>> {
    let key_bytes = decode_hex(key)?;
    if key_bytes.len() < 32 {
        return Err(SyncError::ProtocolError(format!("Storage key too short: {}", key)));
    }
    let proxied = AccountId::from_slice(&key_bytes[key_bytes.len() - 32..])
        .map_err(|e| SyncError::SerializationError(e.to_string()))?;

    let decoded = coder.decode_storage(path, &decode_hex(value)?)?;
    // (BoundedVec<ProxyDefinition>, deposit)
    let (definitions, _deposit): (Vec<ProxyDefinition>, Value) = serde_json::from_value(decoded)
        .map_err(|e| SyncError::SerializationError(format!("Unexpected proxy definition: {}", e)))?;

    definitions
        .into_iter()
        .map(|definition| {
            let proxy = AccountId::from_hex(&definition.delegate)
                .map_err(|e| SyncError::SerializationError(e.to_string()))?;

            Ok(DiscoveredProxy {
                proxied,
                proxy,
                proxy_type: ProxyType::from_runtime_name(&definition.proxy_type),
                delay: definition.delay,
            })
        })
        .collect()
}

/// Reads `Proxy.Proxies` over a chain connection.
///
/// Keys are `prefix ++ twox64(proxied) ++ proxied`, so the proxied account is
/// the last 32 bytes of each key.
pub struct ChainProxyStorageSource {
    connection: Arc<dyn ChainConnection>,
    runtime: Arc<dyn RuntimeCodingService>,
}

impl ChainProxyStorageSource {
    pub fn new(connection: Arc<dyn ChainConnection>, runtime: Arc<dyn RuntimeCodingService>) -> Self {
        Self { connection, runtime }
    }

    async fn fetch_keys(&self, prefix: &str, block_hash: Option<&str>) -> SyncResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut start_key: Option<String> = None;

        loop {
            let page = self
                .connection
                .send(
                    "state_getKeysPaged",
                    json!([prefix, KEYS_PAGE_SIZE, start_key, block_hash]),
                )
                .await?;

            let page: Vec<String> = serde_json::from_value(page)
                .map_err(|e| SyncError::ProtocolError(format!("Unexpected keys page: {}", e)))?;

            let page_len = page.len();
            start_key = page.last().cloned();
            keys.extend(page);

            if page_len < KEYS_PAGE_SIZE as usize {
                return Ok(keys);
            }
        }
    }
}

#[async_trait]
impl ProxyStorageSource for ChainProxyStorageSource {
    async fn fetch_proxies(&self, block_hash: Option<&str>) -> SyncResult<Vec<DiscoveredProxy>> {
        let coder = self.runtime.fetch_coder_factory().await?;
        let path = StoragePath::new("Proxy", "Proxies");
        let prefix = format!("0x{}", hex::encode(coder.storage_key(&path, &[])?));

        let keys = self.fetch_keys(&prefix, block_hash).await?;
        debug!("Found {} proxied accounts", keys.len());

        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let result = self
            .connection
            .send("state_queryStorageAt", json!([keys, block_hash]))
            .await?;
        let change_sets: Vec<StorageChangeSet> = serde_json::from_value(result)
            .map_err(|e| SyncError::ProtocolError(format!("Unexpected storage response: {}", e)))?;

        let mut proxies = Vec::new();
        for change_set in change_sets {
            for (key, value) in change_set.changes {
                if let Some(value) = value {
                    proxies.extend(decode_entry(&path, coder.as_ref(), &key, &value)?);
                }
            }
        }

        Ok(proxies)
    }
}

/// Options of a proxy lookup
#[derive(Debug, Clone, Default)]
pub struct ProxyFetchOptions {
    /// Read proxy storage at this block instead of the best one
    pub block_hash: Option<String>,
    /// Leave grants with an announcement delay out of the result
    pub exclude_delayed: bool,
}

/// Proxied accounts of one chain, cached per proxy account
pub struct ProxyAccountsRepository {
    chain_id: ChainId,
    source: Arc<dyn ProxyStorageSource>,
    cache: DelegatedAccountsCache<DiscoveredProxy>,
}

impl ProxyAccountsRepository {
    pub fn new(chain_id: ChainId, source: Arc<dyn ProxyStorageSource>) -> Self {
        Self {
            chain_id,
            source,
            cache: DelegatedAccountsCache::new(),
        }
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    /// Grants in which each of `proxies` is the proxy, keyed by proxy.
    ///
    /// Delayed grants are always cached; `exclude_delayed` only filters what
    /// this call returns.
    pub async fn fetch_delegates(
        &self,
        proxies: &HashSet<AccountId>,
        options: &ProxyFetchOptions,
    ) -> SyncResult<DelegateMap<DiscoveredProxy>> {
        let source = self.source.clone();
        let block_hash = options.block_hash.clone();

        let mut result = self
            .cache
            .fetch_with(proxies, |_| async move { source.fetch_proxies(block_hash.as_deref()).await })
            .await?;

        if options.exclude_delayed {
            for records in result.values_mut() {
                records.retain(|record| !DelegateRecord::has_delay(record));
            }
        }

        info!("Resolved proxies for {} accounts on {}", result.len(), self.chain_id);

        Ok(result)
    }

    pub fn cached(&self) -> DelegateMap<DiscoveredProxy> {
        self.cache.snapshot()
    }
}
