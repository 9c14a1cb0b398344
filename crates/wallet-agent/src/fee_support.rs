use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use wallet_connection::ChainConnection;
use wallet_core::{DispatchQueue, Observable, RuntimeCodingService, StoragePath, SubscriptionId};
use wallet_types::{AssetId, ChainId, ChainModel, CustomFeeKind};

use crate::error::AgentResult;
use crate::registry::{ChainChange, ChainRegistry};

/// Asset-hub pallet instance of the `Assets` pallet
const ASSETS_PALLET_INSTANCE: u8 = 50;

/// Decides whether fees on one chain can be paid in a given asset
#[async_trait]
pub trait AssetExchangeFeeSupportFetcher: Send + Sync {
    fn chain_id(&self) -> &ChainId;

    fn kind(&self) -> CustomFeeKind;

    async fn supports_fee_payment(&self, asset_id: AssetId) -> AgentResult<bool>;
}

impl fmt::Debug for dyn AssetExchangeFeeSupportFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetExchangeFeeSupportFetcher")
            .field("chain_id", self.chain_id())
            .field("kind", &self.kind())
            .finish()
    }
}

pub type FeeSupportFetchers = Vec<Arc<dyn AssetExchangeFeeSupportFetcher>>;

async fn storage_exists(
    connection: &dyn ChainConnection,
    runtime: &dyn RuntimeCodingService,
    path: StoragePath,
    keys: &[Value],
) -> AgentResult<bool> {
    let coder = runtime.fetch_coder_factory().await?;
    let key = format!("0x{}", hex::encode(coder.storage_key(&path, keys)?));
    let value = connection.send("state_getStorage", json!([key])).await?;

    Ok(!value.is_null())
}

/// Asset hubs accept any asset that has a conversion pool against the native token
pub struct AssetHubFeeSupportFetcher {
    chain: ChainModel,
    connection: Arc<dyn ChainConnection>,
    runtime: Arc<dyn RuntimeCodingService>,
}

impl AssetHubFeeSupportFetcher {
    pub fn new(chain: ChainModel, connection: Arc<dyn ChainConnection>, runtime: Arc<dyn RuntimeCodingService>) -> Self {
        Self { chain, connection, runtime }
    }

    fn native_location() -> Value {
        json!({ "parents": 1, "interior": "Here" })
    }

    fn asset_location(asset_id: AssetId) -> Value {
        json!({
            "parents": 0,
            "interior": { "X2": [{ "PalletInstance": ASSETS_PALLET_INSTANCE }, { "GeneralIndex": asset_id }] }
        })
    }
}

#[async_trait]
impl AssetExchangeFeeSupportFetcher for AssetHubFeeSupportFetcher {
    fn chain_id(&self) -> &ChainId {
        &self.chain.chain_id
    }

    fn kind(&self) -> CustomFeeKind {
        CustomFeeKind::AssetHub
    }

    async fn supports_fee_payment(&self, asset_id: AssetId) -> AgentResult<bool> {
        if asset_id == self.chain.native_asset_id {
            return Ok(true);
        }

        let pool = json!([Self::native_location(), Self::asset_location(asset_id)]);
        storage_exists(
            self.connection.as_ref(),
            self.runtime.as_ref(),
            StoragePath::new("AssetConversion", "Pools"),
            &[pool],
        )
        .await
    }
}

/// Hydration keeps an explicit list of currencies accepted for fees
pub struct HydrationFeeSupportFetcher {
    chain: ChainModel,
    connection: Arc<dyn ChainConnection>,
    runtime: Arc<dyn RuntimeCodingService>,
}

impl HydrationFeeSupportFetcher {
    pub fn new(chain: ChainModel, connection: Arc<dyn ChainConnection>, runtime: Arc<dyn RuntimeCodingService>) -> Self {
        Self { chain, connection, runtime }
    }
}

#[async_trait]
impl AssetExchangeFeeSupportFetcher for HydrationFeeSupportFetcher {
    fn chain_id(&self) -> &ChainId {
        &self.chain.chain_id
    }

    fn kind(&self) -> CustomFeeKind {
        CustomFeeKind::Hydration
    }

    async fn supports_fee_payment(&self, asset_id: AssetId) -> AgentResult<bool> {
        if asset_id == self.chain.native_asset_id {
            return Ok(true);
        }

        storage_exists(
            self.connection.as_ref(),
            self.runtime.as_ref(),
            StoragePath::new("MultiTransactionPayment", "AcceptedCurrencies"),
            &[json!(asset_id)],
        )
        .await
    }
}

#[derive(Default)]
struct ProviderState {
    /// Chains that currently allow custom fee payment
    chains: HashMap<ChainId, ChainModel>,
    subscription: Option<SubscriptionId>,
}

/// Publishes one fee support fetcher per chain that allows paying fees in
/// non-native assets.
///
/// Every relevant chain change rebuilds and republishes the whole list.
pub struct AssetExchangeFeeSupportProvider {
    registry: Arc<dyn ChainRegistry>,
    work_queue: DispatchQueue,
    state: Mutex<ProviderState>,
    fetchers: Observable<FeeSupportFetchers>,
    self_ref: Weak<AssetExchangeFeeSupportProvider>,
}

impl AssetExchangeFeeSupportProvider {
    /// Chain changes are processed on `work_queue`
    pub fn new(registry: Arc<dyn ChainRegistry>, work_queue: DispatchQueue) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            registry,
            work_queue,
            state: Mutex::new(ProviderState::default()),
            fetchers: Observable::new(Vec::new()),
            self_ref: self_ref.clone(),
        })
    }

    fn state(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn setup(&self) {
        let mut state = self.state();
        if state.subscription.is_some() {
            return;
        }

        let provider = self.self_ref.clone();
        let id = self.registry.subscribe_chain_changes(
            self.work_queue.clone(),
            Arc::new(move |changes| {
                if let Some(provider) = provider.upgrade() {
                    provider.handle_chain_changes(changes);
                }
            }),
        );

        state.subscription = Some(id);
    }

    pub fn throttle(&self) {
        let subscription = self.state().subscription.take();

        if let Some(id) = subscription {
            self.registry.unsubscribe_chain_changes(id);
        }
    }

    fn handle_chain_changes(&self, changes: Vec<ChainChange>) {
        let mut state = self.state();
        let mut affected = false;

        for change in changes {
            match change {
                ChainChange::Insert(chain) | ChainChange::Update(chain) => {
                    let chain_id = chain.chain_id.clone();
                    if chain.supports_custom_fees() {
                        state.chains.insert(chain_id, chain);
                        affected = true;
                    } else {
                        affected |= state.chains.remove(&chain_id).is_some();
                    }
                }
                ChainChange::Delete(chain_id) => {
                    affected |= state.chains.remove(&chain_id).is_some();
                }
            }
        }

        if !affected {
            return;
        }

        let fetchers = self.build_fetchers(&state.chains);
        info!("Publishing {} fee support fetchers", fetchers.len());
        self.fetchers.set(fetchers);
    }

    fn build_fetchers(&self, chains: &HashMap<ChainId, ChainModel>) -> FeeSupportFetchers {
        let mut sorted: Vec<&ChainModel> = chains.values().collect();
        sorted.sort_by(|a, b| a.chain_id.as_str().cmp(b.chain_id.as_str()));

        sorted
            .into_iter()
            .filter_map(|chain| self.build_fetcher(chain))
            .collect()
    }

    fn build_fetcher(&self, chain: &ChainModel) -> Option<Arc<dyn AssetExchangeFeeSupportFetcher>> {
        let kind = chain.custom_fee?;

        let Some(connection) = self.registry.get_connection(&chain.chain_id) else {
            warn!("Skipping fee support for {}: no connection", chain.name);
            return None;
        };

        let Some(runtime) = self.registry.get_runtime_provider(&chain.chain_id) else {
            warn!("Skipping fee support for {}: no runtime provider", chain.name);
            return None;
        };

        debug!("Building {:?} fee support fetcher for {}", kind, chain.name);

        let fetcher: Arc<dyn AssetExchangeFeeSupportFetcher> = match kind {
            CustomFeeKind::AssetHub => Arc::new(AssetHubFeeSupportFetcher::new(chain.clone(), connection, runtime)),
            CustomFeeKind::Hydration => Arc::new(HydrationFeeSupportFetcher::new(chain.clone(), connection, runtime)),
        };

        Some(fetcher)
    }

    /// Replays the current list on `queue`, then every republished list
    pub fn subscribe_fee_fetchers<F>(&self, queue: DispatchQueue, on_change: F) -> SubscriptionId
    where
        F: Fn(FeeSupportFetchers) + Send + Sync + 'static,
    {
        self.fetchers.subscribe(queue, on_change)
    }

    pub fn unsubscribe_fee_fetchers(&self, id: SubscriptionId) {
        self.fetchers.unsubscribe(id);
    }

    pub fn current_fetchers(&self) -> FeeSupportFetchers {
        self.fetchers.get()
    }
}
