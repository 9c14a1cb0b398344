use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, trace};
use wallet_types::{AccountId, ChainId, PendingOperation, PendingOperationKey};

const CHANGES_CAPACITY: usize = 64;

/// Change notification emitted by [`PendingOperationStore`]
#[derive(Debug, Clone, PartialEq)]
pub enum PendingOperationChange {
    /// The operation after merging the latest observation
    Updated(PendingOperation),
    Removed(PendingOperationKey),
}

impl PendingOperationChange {
    pub fn key(&self) -> PendingOperationKey {
        match self {
            PendingOperationChange::Updated(operation) => operation.key(),
            PendingOperationChange::Removed(key) => key.clone(),
        }
    }
}

/// Pending multisig operations keyed by (call hash, chain, multisig account).
///
/// Observations are merged into the stored operation, never replacing it.
/// Changes are broadcast while the map lock is held, so receivers see them in
/// the order they were applied.
pub struct PendingOperationStore {
    operations: Mutex<HashMap<PendingOperationKey, PendingOperation>>,
    changes: broadcast::Sender<PendingOperationChange>,
}

impl Default for PendingOperationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingOperationStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGES_CAPACITY);
        Self { operations: Mutex::new(HashMap::new()), changes }
    }

    fn operations(&self) -> MutexGuard<'_, HashMap<PendingOperationKey, PendingOperation>> {
        self.operations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merges `observation` into the stored operation and returns the result
    pub fn apply(&self, observation: PendingOperation) -> PendingOperation {
        let mut operations = self.operations();
        let key = observation.key();

        let merged = match operations.get(&key) {
            Some(existing) => existing.merging(&observation),
            None => observation,
        };

        debug!(
            "Pending operation {} on {} now has {} approvals",
            merged.call_hash,
            merged.chain_id,
            merged.approvals_count()
        );

        operations.insert(key, merged.clone());
        self.publish(PendingOperationChange::Updated(merged.clone()));

        merged
    }

    /// Drops an executed or cancelled operation
    pub fn remove(&self, key: &PendingOperationKey) -> Option<PendingOperation> {
        let mut operations = self.operations();
        let removed = operations.remove(key);

        if removed.is_some() {
            debug!("Pending operation {} on {} removed", key.call_hash, key.chain_id);
            self.publish(PendingOperationChange::Removed(key.clone()));
        }

        removed
    }

    pub fn get(&self, key: &PendingOperationKey) -> Option<PendingOperation> {
        self.operations().get(key).cloned()
    }

    /// Operations of one multisig account, oldest first
    pub fn operations_for(&self, chain_id: &ChainId, multisig_account_id: &AccountId) -> Vec<PendingOperation> {
        let mut operations: Vec<PendingOperation> = self
            .operations()
            .values()
            .filter(|operation| {
                &operation.chain_id == chain_id && &operation.multisig_account_id == multisig_account_id
            })
            .cloned()
            .collect();

        operations.sort_by_key(|operation| operation.timestamp);
        operations
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PendingOperationChange> {
        self.changes.subscribe()
    }

    fn publish(&self, change: PendingOperationChange) {
        if self.changes.send(change).is_err() {
            trace!("No listeners for pending operation changes");
        }
    }
}
