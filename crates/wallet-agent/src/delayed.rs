use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info, warn};
use wallet_core::call_store::CallTicket;
use wallet_core::{CallStore, CoreResult, DispatchQueue, Observable, SubscriptionId, WalletRepository};
use wallet_types::{ChainId, Delegation, MetaAccount, MetaId};

/// Answers whether a wallet's calls on a chain go through a delayed or
/// multi-party flow instead of executing right away.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalletDelayedExecVerifier {
    selected: Option<MetaId>,
    wallets: HashMap<MetaId, MetaAccount>,
}

impl WalletDelayedExecVerifier {
    /// Verifier that never reports a delay
    pub fn no_delay(selected: Option<MetaId>) -> Self {
        Self { selected, wallets: HashMap::new() }
    }

    pub fn from_wallets(selected: Option<MetaId>, wallets: Vec<MetaAccount>) -> Self {
        Self {
            selected,
            wallets: wallets.into_iter().map(|wallet| (wallet.meta_id.clone(), wallet)).collect(),
        }
    }

    pub fn selected(&self) -> Option<&MetaId> {
        self.selected.as_ref()
    }

    /// Delay check for the selected wallet
    pub fn executes_call_with_delay(&self, chain_id: &ChainId) -> bool {
        self.selected
            .as_ref()
            .map(|meta_id| self.wallet_executes_with_delay(meta_id, chain_id))
            .unwrap_or(false)
    }

    pub fn wallet_executes_with_delay(&self, meta_id: &MetaId, chain_id: &ChainId) -> bool {
        let mut visited = HashSet::new();
        self.needs_delay(meta_id, chain_id, &mut visited)
    }

    fn needs_delay(&self, meta_id: &MetaId, chain_id: &ChainId, visited: &mut HashSet<MetaId>) -> bool {
        // A proxy cycle never resolves to a wallet that can sign directly
        if !visited.insert(meta_id.clone()) {
            return true;
        }

        let Some(wallet) = self.wallets.get(meta_id) else {
            return false;
        };

        match wallet.delegation(chain_id) {
            None => false,
            Some(Delegation::Multisig { .. }) => true,
            Some(Delegation::Proxy { delay, .. }) if *delay > 0 => true,
            Some(Delegation::Proxy { proxy, .. }) => {
                let candidates: Vec<&MetaId> = self
                    .wallets
                    .values()
                    .filter(|candidate| &candidate.meta_id != meta_id)
                    .filter(|candidate| candidate.account_id(chain_id).as_ref() == Some(proxy))
                    .map(|candidate| &candidate.meta_id)
                    .collect();

                // Delayed only when every wallet able to act as the proxy is delayed itself
                !candidates.is_empty()
                    && candidates
                        .into_iter()
                        .all(|candidate| self.needs_delay(candidate, chain_id, &mut visited.clone()))
            }
        }
    }
}

struct ProviderState {
    active: bool,
    selected: Option<MetaId>,
}

/// Keeps a [`WalletDelayedExecVerifier`] in sync with the persisted wallets.
///
/// Until the first repository fetch completes the published verifier answers
/// `false` for everything. `throttle` cancels a pending fetch so its result is
/// dropped instead of landing in an inactive provider.
pub struct WalletDelayedExecutionProvider {
    repository: Arc<dyn WalletRepository>,
    state: Mutex<ProviderState>,
    verifier: Observable<WalletDelayedExecVerifier>,
    call_store: CallStore,
    self_ref: Weak<WalletDelayedExecutionProvider>,
}

impl WalletDelayedExecutionProvider {
    pub fn new(repository: Arc<dyn WalletRepository>, selected: Option<MetaId>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            repository,
            verifier: Observable::new(WalletDelayedExecVerifier::no_delay(selected.clone())),
            state: Mutex::new(ProviderState { active: false, selected }),
            call_store: CallStore::new(),
            self_ref: self_ref.clone(),
        })
    }

    fn state(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn setup(&self) {
        let mut state = self.state();
        if state.active {
            return;
        }

        state.active = true;
        drop(state);

        debug!("Delayed execution provider activated");
        self.refresh();
    }

    pub fn throttle(&self) {
        let mut state = self.state();
        if !state.active {
            return;
        }

        state.active = false;
        self.call_store.cancel();
        debug!("Delayed execution provider throttled");
    }

    pub fn is_active(&self) -> bool {
        self.state().active
    }

    /// Switches the wallet the verifier answers for and refetches
    pub fn select_wallet(&self, meta_id: Option<MetaId>) {
        self.state().selected = meta_id;
        self.refresh();
    }

    /// Recomputes the verifier from the persisted wallets; ignored while inactive
    pub fn refresh(&self) {
        if !self.is_active() {
            return;
        }

        let ticket = self.call_store.begin();
        let repository = self.repository.clone();
        let provider = self.self_ref.clone();

        let handle = tokio::spawn(async move {
            let result = repository.fetch_all_wallets().await;

            if let Some(provider) = provider.upgrade() {
                provider.complete_refresh(ticket, result);
            }
        });

        self.call_store.attach(ticket, handle.abort_handle());
    }

    fn complete_refresh(&self, ticket: CallTicket, result: CoreResult<Vec<MetaAccount>>) {
        let state = self.state();

        if !self.call_store.finish(ticket) || !state.active {
            debug!("Discarding stale wallet refresh");
            return;
        }

        match result {
            Ok(wallets) => {
                info!("Recomputed delayed execution rules for {} wallets", wallets.len());
                let verifier = WalletDelayedExecVerifier::from_wallets(state.selected.clone(), wallets);
                self.verifier.set(verifier);
            }
            Err(e) => warn!("Failed to fetch wallets: {}", e),
        }
    }

    /// Replays the current verifier on `queue`, then every later change
    pub fn subscribe_delayed_exec_verifier<F>(&self, queue: DispatchQueue, on_change: F) -> SubscriptionId
    where
        F: Fn(WalletDelayedExecVerifier) + Send + Sync + 'static,
    {
        self.verifier.subscribe(queue, on_change)
    }

    pub fn unsubscribe_delayed_exec_verifier(&self, id: SubscriptionId) {
        self.verifier.unsubscribe(id);
    }

    pub fn get_current_state(&self) -> WalletDelayedExecVerifier {
        let _state = self.state();
        self.verifier.get()
    }
}
