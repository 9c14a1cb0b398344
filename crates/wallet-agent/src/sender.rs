//! Works out which account signs an extrinsic sent from a wallet and whether
//! that delegate's permissions cover the calls.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};
use wallet_core::{RuntimeCall, WalletRepository};
use wallet_sync::{MultisigAccountsRepository, ProxyAccountsRepository, ProxyFetchOptions};
use wallet_types::{
    AccountId, ChainAccount, ChainId, Delegation, DiscoveredProxy, MetaAccount, ProxyType, WalletType,
};

use crate::error::{AgentError, AgentResult};
use crate::signer::{DelegateResolution, SenderResolution};

/// Narrowest proxy type allowed to dispatch `call`
pub fn required_proxy_type(call: &RuntimeCall) -> ProxyType {
    match (call.module.as_str(), call.function.as_str()) {
        ("Balances" | "Assets" | "Tokens" | "Currencies" | "XTokens" | "XcmPallet" | "PolkadotXcm", _) => {
            ProxyType::Any
        }
        ("Staking" | "FastUnstake" | "VoterList" | "Session", _) => ProxyType::Staking,
        (
            "ConvictionVoting" | "Referenda" | "Democracy" | "Council" | "TechnicalCommittee" | "Treasury"
            | "Bounties" | "ChildBounties" | "Whitelist",
            _,
        ) => ProxyType::Governance,
        ("NominationPools", _) => ProxyType::NominationPools,
        ("Proxy", "reject_announcement" | "remove_announcement") => ProxyType::CancelProxy,
        _ => ProxyType::NonTransfer,
    }
}

/// Chain of proxy grants from a proxied account to the account that signs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyPath {
    /// Grants in dispatch order; the first one is held by the proxied account
    pub hops: Vec<DiscoveredProxy>,
}

impl ProxyPath {
    /// Account at the end of the path
    pub fn signer(&self) -> Option<&AccountId> {
        self.hops.last().map(|hop| &hop.proxy)
    }
}

/// Proxy grants of one chain, indexed by proxied account
#[derive(Debug, Default)]
pub struct ProxyGraph {
    grants: HashMap<AccountId, Vec<DiscoveredProxy>>,
}

impl ProxyGraph {
    pub fn new<I>(grants: I) -> Self
    where
        I: IntoIterator<Item = DiscoveredProxy>,
    {
        let mut graph = Self::default();
        for grant in grants {
            let entry = graph.grants.entry(grant.proxied).or_default();
            if !entry.contains(&grant) {
                entry.push(grant);
            }
        }
        graph
    }

    /// Graph from discovered grants plus the proxy delegations stored on local wallets
    pub fn build<I>(wallets: &[MetaAccount], chain_id: &ChainId, discovered: I) -> Self
    where
        I: IntoIterator<Item = DiscoveredProxy>,
    {
        let stored = wallets.iter().filter_map(|wallet| {
            let account = wallet.account(chain_id)?;
            match account.delegation.as_ref()? {
                Delegation::Proxy { proxy, proxy_type, delay } => Some(DiscoveredProxy {
                    proxied: account.account_id,
                    proxy: *proxy,
                    proxy_type: proxy_type.clone(),
                    delay: *delay,
                }),
                Delegation::Multisig { .. } => None,
            }
        });

        Self::new(discovered.into_iter().chain(stored))
    }

    /// Every path from `proxied` whose first grant covers all of `required`.
    ///
    /// Nested hops dispatch `Proxy.proxy` themselves, so they need a grant that
    /// covers `NonTransfer`. An account never appears twice on one path.
    pub fn resolve_paths(&self, proxied: &AccountId, required: &[ProxyType]) -> Vec<ProxyPath> {
        let mut paths = Vec::new();
        let mut visited = HashSet::from([*proxied]);
        self.walk(proxied, required, &mut visited, &mut Vec::new(), &mut paths);
        paths
    }

    fn walk(
        &self,
        account: &AccountId,
        required: &[ProxyType],
        visited: &mut HashSet<AccountId>,
        hops: &mut Vec<DiscoveredProxy>,
        paths: &mut Vec<ProxyPath>,
    ) {
        let Some(grants) = self.grants.get(account) else {
            return;
        };

        for grant in grants {
            if visited.contains(&grant.proxy) || !required.iter().all(|kind| grant.proxy_type.covers(kind)) {
                continue;
            }

            visited.insert(grant.proxy);
            hops.push(grant.clone());
            paths.push(ProxyPath { hops: hops.clone() });

            self.walk(&grant.proxy, &[ProxyType::NonTransfer], visited, hops, paths);

            hops.pop();
            visited.remove(&grant.proxy);
        }
    }
}

/// Lower is preferred when several wallets hold the same delegate account
fn signing_rank(wallet: &MetaAccount) -> u8 {
    match wallet.wallet_type {
        WalletType::Secrets => 0,
        WalletType::Ledger => 1,
        WalletType::Proxied | WalletType::Multisig => 2,
        WalletType::WatchOnly => 3,
    }
}

/// Best local wallet controlling `account_id` on the chain
fn find_delegate_wallet<'a>(
    wallets: &'a [MetaAccount],
    chain_id: &ChainId,
    account_id: &AccountId,
    delegated_meta_id: &str,
) -> Option<&'a MetaAccount> {
    wallets
        .iter()
        .filter(|wallet| wallet.meta_id != delegated_meta_id)
        .filter(|wallet| wallet.account_id(chain_id).as_ref() == Some(account_id))
        .min_by_key(|wallet| signing_rank(wallet))
}

/// Resolves the sender of extrinsics built for a wallet on one chain.
///
/// Multisig membership is confirmed through the indexer-backed repository and
/// proxy paths through on-chain proxy storage; when the remote side knows
/// nothing the delegation stored on the wallet is used as is.
pub struct ExtrinsicSenderResolver {
    chain_id: ChainId,
    wallet_repository: Arc<dyn WalletRepository>,
    multisigs: Arc<MultisigAccountsRepository>,
    proxies: Arc<ProxyAccountsRepository>,
}

impl ExtrinsicSenderResolver {
    pub fn new(
        chain_id: ChainId,
        wallet_repository: Arc<dyn WalletRepository>,
        multisigs: Arc<MultisigAccountsRepository>,
        proxies: Arc<ProxyAccountsRepository>,
    ) -> Self {
        Self { chain_id, wallet_repository, multisigs, proxies }
    }

    pub async fn resolve(&self, wallet: &MetaAccount, calls: Vec<RuntimeCall>) -> AgentResult<SenderResolution> {
        let account = wallet.account(&self.chain_id).cloned().ok_or_else(|| {
            AgentError::SenderResolutionError(format!("Wallet {} has no account on {}", wallet.meta_id, self.chain_id))
        })?;

        let resolution = match (wallet.is_delegated(), account.delegation.clone()) {
            (true, Some(Delegation::Multisig { signatory, .. })) => {
                let wallets = self.wallet_repository.fetch_all_wallets().await?;
                self.resolve_multisig(wallet, account, signatory, calls, &wallets).await?
            }
            (true, Some(Delegation::Proxy { .. })) => {
                let wallets = self.wallet_repository.fetch_all_wallets().await?;
                self.resolve_proxy(wallet, account, calls, &wallets).await?
            }
            _ => SenderResolution::Current(account),
        };

        debug!(
            "Sender of {} on {} resolved, delegated: {}",
            wallet.meta_id,
            self.chain_id,
            resolution.is_delegated()
        );

        Ok(resolution)
    }

    async fn resolve_multisig(
        &self,
        wallet: &MetaAccount,
        account: ChainAccount,
        signatory: AccountId,
        calls: Vec<RuntimeCall>,
        wallets: &[MetaAccount],
    ) -> AgentResult<SenderResolution> {
        let discovered = self.multisigs.fetch_delegates(&HashSet::from([signatory])).await?;

        let delegation = discovered
            .get(&signatory)
            .and_then(|records| records.iter().find(|multisig| multisig.account_id == account.account_id))
            .map(|multisig| Delegation::from_multisig(multisig, signatory));

        let delegation = match (delegation, account.delegation.clone()) {
            (Some(delegation), _) => delegation,
            (None, Some(stored)) => {
                debug!("No indexed multisig {} for {}, using stored delegation", account.account_id, signatory);
                stored
            }
            (None, None) => return Err(AgentError::DelegateNotFound(signatory)),
        };

        let delegate = find_delegate_wallet(wallets, &self.chain_id, &signatory, &wallet.meta_id)
            .ok_or(AgentError::DelegateNotFound(signatory))?;

        Ok(SenderResolution::Delegate(DelegateResolution {
            delegated_account: account,
            delegate_wallet: delegate.clone(),
            delegate_account_id: signatory,
            delegation,
            calls,
            can_sign_with_delegate: delegate.has_local_keys(),
        }))
    }

    async fn resolve_proxy(
        &self,
        wallet: &MetaAccount,
        account: ChainAccount,
        calls: Vec<RuntimeCall>,
        wallets: &[MetaAccount],
    ) -> AgentResult<SenderResolution> {
        let local: HashSet<AccountId> = wallets
            .iter()
            .filter(|candidate| candidate.meta_id != wallet.meta_id)
            .filter_map(|candidate| candidate.account_id(&self.chain_id))
            .collect();

        let discovered = self.proxies.fetch_delegates(&local, &ProxyFetchOptions::default()).await?;
        let graph = ProxyGraph::build(wallets, &self.chain_id, discovered.into_values().flatten());

        let required: Vec<ProxyType> = calls.iter().map(required_proxy_type).collect();
        let paths = graph.resolve_paths(&account.account_id, &required);

        let best = paths
            .iter()
            .filter_map(|path| {
                let signer = path.signer()?;
                let delegate = find_delegate_wallet(wallets, &self.chain_id, signer, &wallet.meta_id)?;
                Some((path, delegate))
            })
            .min_by_key(|(path, delegate)| (signing_rank(delegate), path.hops.len()));

        if let Some((path, delegate)) = best {
            let (Some(first), Some(signer)) = (path.hops.first(), path.signer()) else {
                return Err(AgentError::SenderResolutionError("Empty proxy path".to_string()));
            };

            info!("Proxied {} signs through {} hop(s)", account.account_id, path.hops.len());

            return Ok(SenderResolution::Delegate(DelegateResolution {
                delegation: Delegation::Proxy {
                    proxy: first.proxy,
                    proxy_type: first.proxy_type.clone(),
                    delay: first.delay,
                },
                delegate_account_id: *signer,
                delegate_wallet: delegate.clone(),
                delegated_account: account,
                calls,
                can_sign_with_delegate: delegate.has_local_keys(),
            }));
        }

        // No grant covers the calls; the stored proxy is asked and can only acknowledge
        let stored = account
            .delegation
            .clone()
            .ok_or_else(|| AgentError::SenderResolutionError(format!("{} has no proxy", account.account_id)))?;
        let proxy = *stored.delegate();
        let delegate =
            find_delegate_wallet(wallets, &self.chain_id, &proxy, &wallet.meta_id).ok_or(AgentError::DelegateNotFound(proxy))?;

        info!("No proxy of {} covers {} call(s)", account.account_id, calls.len());

        Ok(SenderResolution::Delegate(DelegateResolution {
            delegated_account: account,
            delegate_wallet: delegate.clone(),
            delegate_account_id: proxy,
            delegation: stored,
            calls,
            can_sign_with_delegate: false,
        }))
    }
}
