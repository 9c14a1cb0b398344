use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info, warn};
use wallet_core::{DispatchQueue, SubscriptionId};
use wallet_types::{ChainId, ChainModel};

use crate::connection::{ChainConnection, ConnectionId, ConnectionState, ConnectionStateDelegate};
use crate::error::ConnectionResult;
use crate::factory::ConnectionFactory;

/// Listener for one chain's connection state
pub trait ConnectionStateSubscriber: Send + Sync {
    fn did_receive_connection_state(&self, state: ConnectionState, chain_id: &ChainId);
}

struct SubscriberEntry {
    id: SubscriptionId,
    subscriber: Weak<dyn ConnectionStateSubscriber>,
}

impl SubscriberEntry {
    fn is_alive(&self) -> bool {
        self.subscriber.strong_count() > 0
    }

    fn matches(&self, subscriber: &Arc<dyn ConnectionStateSubscriber>) -> bool {
        std::ptr::addr_eq(self.subscriber.as_ptr(), Arc::as_ptr(subscriber))
    }
}

#[derive(Default)]
struct PoolState {
    connections: HashMap<ChainId, Weak<dyn ChainConnection>>,
    subscribers: HashMap<ChainId, Vec<SubscriberEntry>>,
}

impl PoolState {
    fn purge_connections(&mut self) {
        self.connections.retain(|_, connection| connection.strong_count() > 0);
    }

    fn live_connections(&self) -> Vec<Arc<dyn ChainConnection>> {
        self.connections.values().filter_map(Weak::upgrade).collect()
    }
}

/// Shares one connection per chain and fans out its state changes.
///
/// The pool never keeps connections or subscribers alive: both tables hold
/// weak references and dead entries are dropped on the next lookup. One mutex
/// guards both tables for the duration of every public operation.
pub struct ConnectionPool {
    factory: Arc<dyn ConnectionFactory>,
    queue: DispatchQueue,
    state: Mutex<PoolState>,
    self_ref: Weak<ConnectionPool>,
}

impl ConnectionPool {
    /// State notifications are delivered on `queue`
    pub fn new(factory: Arc<dyn ConnectionFactory>, queue: DispatchQueue) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            factory,
            queue,
            state: Mutex::new(PoolState::default()),
            self_ref: self_ref.clone(),
        })
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the chain's connection, creating it on first use.
    ///
    /// An existing connection keeps its identity and only receives the
    /// chain's current node ranking.
    pub fn setup_connection(&self, chain: &ChainModel) -> ConnectionResult<Arc<dyn ChainConnection>> {
        let mut state = self.state();
        state.purge_connections();

        if let Some(connection) = state.connections.get(&chain.chain_id).and_then(Weak::upgrade) {
            debug!("Reusing connection for {}", chain.name);
            connection.change_nodes(chain.sorted_nodes());
            return Ok(connection);
        }

        let delegate: Weak<dyn ConnectionStateDelegate> = self.self_ref.clone();
        let connection = self.factory.create_connection(chain, delegate)?;
        state.connections.insert(chain.chain_id.clone(), Arc::downgrade(&connection));
        drop(state);

        info!("Created connection for {}", chain.name);
        connection.connect();

        Ok(connection)
    }

    pub fn get_connection(&self, chain_id: &ChainId) -> Option<Arc<dyn ChainConnection>> {
        let mut state = self.state();
        state.purge_connections();
        state.connections.get(chain_id).and_then(Weak::upgrade)
    }

    /// Disconnects and forgets the chain's connection
    pub fn remove_connection(&self, chain_id: &ChainId) {
        let removed = self.state().connections.remove(chain_id).and_then(|weak| weak.upgrade());

        if let Some(connection) = removed {
            connection.disconnect();
            info!("Removed connection for {}", chain_id);
        }
    }

    /// Registers `subscriber` for `chain_id` and replays the current state.
    ///
    /// Subscribing the same subscriber to the same chain again returns the
    /// existing token without a replay.
    pub fn subscribe(
        &self,
        subscriber: &Arc<dyn ConnectionStateSubscriber>,
        chain_id: &ChainId,
    ) -> SubscriptionId {
        let mut state = self.state();

        let current = state
            .connections
            .get(chain_id)
            .and_then(Weak::upgrade)
            .map(|connection| connection.state())
            .unwrap_or(ConnectionState::NotConnected);

        let entries = state.subscribers.entry(chain_id.clone()).or_default();
        entries.retain(SubscriberEntry::is_alive);

        if let Some(existing) = entries.iter().find(|entry| entry.matches(subscriber)) {
            return existing.id;
        }

        let id = SubscriptionId::new();
        entries.push(SubscriberEntry { id, subscriber: Arc::downgrade(subscriber) });

        let replay_target = subscriber.clone();
        let replay_chain = chain_id.clone();
        self.queue
            .dispatch(move || replay_target.did_receive_connection_state(current, &replay_chain));

        id
    }

    /// Removes the subscriber's registration for this chain only
    pub fn unsubscribe(&self, subscriber: &Arc<dyn ConnectionStateSubscriber>, chain_id: &ChainId) {
        let mut state = self.state();

        if let Some(entries) = state.subscribers.get_mut(chain_id) {
            entries.retain(|entry| entry.is_alive() && !entry.matches(subscriber));
            if entries.is_empty() {
                state.subscribers.remove(chain_id);
            }
        }
    }

    /// Removes a registration by token
    pub fn unsubscribe_id(&self, id: SubscriptionId) {
        let mut state = self.state();

        for entries in state.subscribers.values_mut() {
            entries.retain(|entry| entry.id != id);
        }
        state.subscribers.retain(|_, entries| !entries.is_empty());
    }

    pub fn subscriber_count(&self, chain_id: &ChainId) -> usize {
        self.state()
            .subscribers
            .get(chain_id)
            .map(|entries| entries.iter().filter(|entry| entry.is_alive()).count())
            .unwrap_or(0)
    }

    pub fn did_enter_foreground(&self) {
        let connections = self.state().live_connections();
        debug!("Foreground: connecting {} connections", connections.len());

        for connection in connections {
            connection.connect();
        }
    }

    pub fn did_enter_background(&self) {
        let connections = self.state().live_connections();
        debug!("Background: disconnecting {} connections", connections.len());

        for connection in connections {
            connection.disconnect();
        }
    }
}

impl ConnectionStateDelegate for ConnectionPool {
    fn connection_state_did_change(&self, connection_id: ConnectionId, new_state: ConnectionState) {
        let mut state = self.state();

        // The table is small and transitions are rare, so scan by identity
        let chain_id = state.connections.iter().find_map(|(chain_id, connection)| {
            connection
                .upgrade()
                .filter(|connection| connection.id() == connection_id)
                .map(|_| chain_id.clone())
        });

        let Some(chain_id) = chain_id else {
            warn!("State {:?} from unknown connection", new_state);
            return;
        };

        debug!("Connection for {} changed to {:?}", chain_id, new_state);

        let Some(entries) = state.subscribers.get_mut(&chain_id) else {
            return;
        };
        entries.retain(SubscriberEntry::is_alive);

        for subscriber in entries.iter().filter_map(|entry| entry.subscriber.upgrade()) {
            let chain_id = chain_id.clone();
            self.queue
                .dispatch(move || subscriber.did_receive_connection_state(new_state, &chain_id));
        }
    }
}
