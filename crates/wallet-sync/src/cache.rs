use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;
use wallet_types::{AccountId, DiscoveredMultisig, DiscoveredProxy};

use crate::error::SyncResult;

/// Delegate records grouped by the delegate account they were requested for
pub type DelegateMap<R> = HashMap<AccountId, Vec<R>>;

/// A remote record describing a delegated-account relationship
pub trait DelegateRecord: Clone + PartialEq + Send + Sync + 'static {
    /// Whether `account_id` acts as a delegate (signatory or proxy) in this relationship
    fn involves_delegate(&self, account_id: &AccountId) -> bool;

    fn has_delay(&self) -> bool {
        false
    }
}

impl DelegateRecord for DiscoveredMultisig {
    fn involves_delegate(&self, account_id: &AccountId) -> bool {
        self.has_signatory(account_id)
    }
}

impl DelegateRecord for DiscoveredProxy {
    fn involves_delegate(&self, account_id: &AccountId) -> bool {
        &self.proxy == account_id
    }

    fn has_delay(&self) -> bool {
        self.delay > 0
    }
}

/// Additive per-chain cache of delegate records keyed by delegate account.
///
/// An entry exists once a delegate has been fetched, even when the fetch found
/// nothing, so it is never requested again. Merging is a union: records are
/// only ever added, which keeps overlapping fetches commutative.
pub struct DelegatedAccountsCache<R: DelegateRecord> {
    entries: Mutex<DelegateMap<R>>,
}

impl<R: DelegateRecord> Default for DelegatedAccountsCache<R> {
    fn default() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }
}

impl<R: DelegateRecord> DelegatedAccountsCache<R> {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, DelegateMap<R>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached records for the known ids plus the ids that still need a fetch.
    /// The split is advisory; the merge step tolerates concurrent fetches.
    pub fn split(&self, account_ids: &HashSet<AccountId>) -> (DelegateMap<R>, HashSet<AccountId>) {
        let entries = self.entries();
        let mut cached = HashMap::new();
        let mut missing = HashSet::new();

        for account_id in account_ids {
            match entries.get(account_id) {
                Some(records) => {
                    cached.insert(*account_id, records.clone());
                }
                None => {
                    missing.insert(*account_id);
                }
            }
        }

        (cached, missing)
    }

    /// Unions the fetched records into the entries of `requested` and returns them
    pub fn merge(&self, requested: &HashSet<AccountId>, fetched: &[R]) -> DelegateMap<R> {
        let mut entries = self.entries();
        let mut merged = HashMap::with_capacity(requested.len());

        for account_id in requested {
            let records = entries.entry(*account_id).or_default();

            for record in fetched.iter().filter(|record| record.involves_delegate(account_id)) {
                if !records.contains(record) {
                    records.push(record.clone());
                }
            }

            merged.insert(*account_id, records.clone());
        }

        merged
    }

    /// Returns records for `account_ids`, fetching the uncached ones with a single `load` call.
    ///
    /// A failed load leaves the cache untouched.
    pub async fn fetch_with<F, Fut>(&self, account_ids: &HashSet<AccountId>, load: F) -> SyncResult<DelegateMap<R>>
    where
        F: FnOnce(HashSet<AccountId>) -> Fut,
        Fut: Future<Output = SyncResult<Vec<R>>>,
    {
        let (mut result, missing) = self.split(account_ids);

        if missing.is_empty() {
            debug!("All {} delegates served from cache", account_ids.len());
            return Ok(result);
        }

        debug!("Fetching {} uncached delegates", missing.len());
        let fetched = load(missing.clone()).await?;
        result.extend(self.merge(&missing, &fetched));

        Ok(result)
    }

    pub fn snapshot(&self) -> DelegateMap<R> {
        self.entries().clone()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }
}
