use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};
use wallet_connection::{ChainConnection, ConnectionPool};
use wallet_core::{DispatchQueue, RuntimeCodingService, SubscriptionId};
use wallet_types::{ChainId, ChainModel};

/// One change of the chain list
#[derive(Debug, Clone, PartialEq)]
pub enum ChainChange {
    Insert(ChainModel),
    Update(ChainModel),
    Delete(ChainId),
}

impl ChainChange {
    pub fn chain_id(&self) -> &ChainId {
        match self {
            ChainChange::Insert(chain) | ChainChange::Update(chain) => &chain.chain_id,
            ChainChange::Delete(chain_id) => chain_id,
        }
    }
}

pub type ChainChangeHandler = Arc<dyn Fn(Vec<ChainChange>) + Send + Sync>;

/// Known chains plus the live services bound to them
pub trait ChainRegistry: Send + Sync {
    /// Replays every known chain as an insert, then delivers later changes on `queue`
    fn subscribe_chain_changes(&self, queue: DispatchQueue, handler: ChainChangeHandler) -> SubscriptionId;

    fn unsubscribe_chain_changes(&self, id: SubscriptionId);

    fn get_connection(&self, chain_id: &ChainId) -> Option<Arc<dyn ChainConnection>>;

    fn get_runtime_provider(&self, chain_id: &ChainId) -> Option<Arc<dyn RuntimeCodingService>>;
}

struct ChainEntry {
    chain: ChainModel,
    // Held so the pool's weak entry stays alive while the chain is registered
    connection: Option<Arc<dyn ChainConnection>>,
    runtime: Option<Arc<dyn RuntimeCodingService>>,
}

#[derive(Default)]
struct RegistryState {
    chains: HashMap<ChainId, ChainEntry>,
    subscribers: HashMap<SubscriptionId, (DispatchQueue, ChainChangeHandler)>,
}

/// Chain registry that owns one pooled connection per registered chain
pub struct LocalChainRegistry {
    pool: Arc<ConnectionPool>,
    state: Mutex<RegistryState>,
}

impl LocalChainRegistry {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            pool,
            state: Mutex::new(RegistryState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds or replaces a chain and its runtime provider
    pub fn register_chain(&self, chain: ChainModel, runtime: Option<Arc<dyn RuntimeCodingService>>) {
        let connection = match self.pool.setup_connection(&chain) {
            Ok(connection) => Some(connection),
            Err(e) => {
                warn!("No connection for {}: {}", chain.name, e);
                None
            }
        };

        let mut state = self.state();
        let change = if state.chains.contains_key(&chain.chain_id) {
            ChainChange::Update(chain.clone())
        } else {
            ChainChange::Insert(chain.clone())
        };

        debug!("Registering chain {}", chain.chain_id);
        state
            .chains
            .insert(chain.chain_id.clone(), ChainEntry { chain, connection, runtime });
        Self::notify(&state, vec![change]);
    }

    pub fn remove_chain(&self, chain_id: &ChainId) {
        let mut state = self.state();

        if state.chains.remove(chain_id).is_none() {
            return;
        }

        self.pool.remove_connection(chain_id);
        debug!("Removed chain {}", chain_id);
        Self::notify(&state, vec![ChainChange::Delete(chain_id.clone())]);
    }

    pub fn get_chain(&self, chain_id: &ChainId) -> Option<ChainModel> {
        self.state().chains.get(chain_id).map(|entry| entry.chain.clone())
    }

    fn notify(state: &RegistryState, changes: Vec<ChainChange>) {
        for (queue, handler) in state.subscribers.values() {
            let handler = handler.clone();
            let changes = changes.clone();
            queue.dispatch(move || handler(changes));
        }
    }
}

impl ChainRegistry for LocalChainRegistry {
    fn subscribe_chain_changes(&self, queue: DispatchQueue, handler: ChainChangeHandler) -> SubscriptionId {
        let mut state = self.state();
        let id = SubscriptionId::new();

        let mut initial: Vec<ChainChange> = state
            .chains
            .values()
            .map(|entry| ChainChange::Insert(entry.chain.clone()))
            .collect();
        initial.sort_by(|a, b| a.chain_id().as_str().cmp(b.chain_id().as_str()));

        let replay_handler = handler.clone();
        queue.dispatch(move || replay_handler(initial));

        state.subscribers.insert(id, (queue, handler));
        id
    }

    fn unsubscribe_chain_changes(&self, id: SubscriptionId) {
        self.state().subscribers.remove(&id);
    }

    fn get_connection(&self, chain_id: &ChainId) -> Option<Arc<dyn ChainConnection>> {
        self.state()
            .chains
            .get(chain_id)
            .and_then(|entry| entry.connection.clone())
            .or_else(|| self.pool.get_connection(chain_id))
    }

    fn get_runtime_provider(&self, chain_id: &ChainId) -> Option<Arc<dyn RuntimeCodingService>> {
        self.state().chains.get(chain_id).and_then(|entry| entry.runtime.clone())
    }
}
