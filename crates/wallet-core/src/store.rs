use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use wallet_types::{MetaAccount, MetaId};

use crate::error::{CoreError, CoreResult};

const CONFIRMS_OPERATION_KEY: &str = "confirmsOperation";

/// Generic per-wallet key-value settings storage
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Load a setting value for a wallet
    async fn fetch_setting(&self, meta_id: &MetaId, key: &str) -> CoreResult<Option<Value>>;

    /// Save a setting value for a wallet
    async fn save_setting(&self, meta_id: &MetaId, key: &str, value: Value) -> CoreResult<()>;
}

/// Whether operations of the wallet need an explicit confirmation step.
/// Defaults to `true` when nothing is stored.
pub async fn confirms_operation(repository: &dyn SettingsRepository, meta_id: &MetaId) -> CoreResult<bool> {
    match repository.fetch_setting(meta_id, CONFIRMS_OPERATION_KEY).await? {
        Some(Value::Bool(value)) => Ok(value),
        Some(other) => Err(CoreError::SerializationError(format!(
            "Unexpected value for {}: {}",
            CONFIRMS_OPERATION_KEY, other
        ))),
        None => Ok(true),
    }
}

pub async fn save_confirms_operation(
    repository: &dyn SettingsRepository,
    meta_id: &MetaId,
    value: bool,
) -> CoreResult<()> {
    repository.save_setting(meta_id, CONFIRMS_OPERATION_KEY, Value::Bool(value)).await
}

/// Read access to persisted wallets
#[async_trait]
pub trait WalletRepository: Send + Sync {
    /// Load every persisted wallet
    async fn fetch_all_wallets(&self) -> CoreResult<Vec<MetaAccount>>;
}

/// In-memory settings storage
#[derive(Clone, Default)]
pub struct MemorySettingsRepository {
    settings: Arc<RwLock<HashMap<(MetaId, String), Value>>>,
}

impl MemorySettingsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsRepository for MemorySettingsRepository {
    async fn fetch_setting(&self, meta_id: &MetaId, key: &str) -> CoreResult<Option<Value>> {
        let settings = self.settings.read().await;
        Ok(settings.get(&(meta_id.clone(), key.to_string())).cloned())
    }

    async fn save_setting(&self, meta_id: &MetaId, key: &str, value: Value) -> CoreResult<()> {
        let mut settings = self.settings.write().await;
        settings.insert((meta_id.clone(), key.to_string()), value);
        Ok(())
    }
}

/// In-memory wallet storage
#[derive(Clone, Default)]
pub struct MemoryWalletRepository {
    wallets: Arc<RwLock<Vec<MetaAccount>>>,
}

impl MemoryWalletRepository {
    pub fn new(wallets: Vec<MetaAccount>) -> Self {
        Self {
            wallets: Arc::new(RwLock::new(wallets)),
        }
    }

    pub async fn save_wallet(&self, wallet: MetaAccount) {
        let mut wallets = self.wallets.write().await;
        wallets.retain(|existing| existing.meta_id != wallet.meta_id);
        wallets.push(wallet);
    }
}

#[async_trait]
impl WalletRepository for MemoryWalletRepository {
    async fn fetch_all_wallets(&self) -> CoreResult<Vec<MetaAccount>> {
        Ok(self.wallets.read().await.clone())
    }
}
