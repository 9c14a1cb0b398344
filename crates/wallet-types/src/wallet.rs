use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::chain::ChainId;
use crate::multisig::DiscoveredMultisig;
use crate::proxy::ProxyType;

/// Stable identifier of a wallet
pub type MetaId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WalletType {
    Secrets,
    WatchOnly,
    Ledger,
    Proxied,
    Multisig,
}

/// How a delegated account is controlled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Delegation {
    Proxy {
        proxy: AccountId,
        proxy_type: ProxyType,
        delay: u32,
    },
    Multisig {
        signatory: AccountId,
        threshold: u16,
        other_signatories: Vec<AccountId>,
    },
}

impl Delegation {
    /// Account that must sign on behalf of the delegated one
    pub fn delegate(&self) -> &AccountId {
        match self {
            Delegation::Proxy { proxy, .. } => proxy,
            Delegation::Multisig { signatory, .. } => signatory,
        }
    }

    pub fn from_multisig(multisig: &DiscoveredMultisig, signatory: AccountId) -> Self {
        Delegation::Multisig {
            signatory,
            threshold: multisig.threshold,
            other_signatories: multisig.other_signatories(&signatory),
        }
    }
}

/// An account of a wallet, either universal (`chain_id == None`) or chain specific
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainAccount {
    pub chain_id: Option<ChainId>,
    pub account_id: AccountId,
    #[serde(default)]
    pub delegation: Option<Delegation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaAccount {
    pub meta_id: MetaId,
    pub name: String,
    pub wallet_type: WalletType,
    pub accounts: Vec<ChainAccount>,
}

impl MetaAccount {
    /// Chain specific account if present, otherwise the universal one
    pub fn account(&self, chain_id: &ChainId) -> Option<&ChainAccount> {
        self.accounts
            .iter()
            .find(|account| account.chain_id.as_ref() == Some(chain_id))
            .or_else(|| self.accounts.iter().find(|account| account.chain_id.is_none()))
    }

    pub fn account_id(&self, chain_id: &ChainId) -> Option<AccountId> {
        self.account(chain_id).map(|account| account.account_id)
    }

    pub fn delegation(&self, chain_id: &ChainId) -> Option<&Delegation> {
        self.account(chain_id).and_then(|account| account.delegation.as_ref())
    }

    pub fn is_delegated(&self) -> bool {
        matches!(self.wallet_type, WalletType::Proxied | WalletType::Multisig)
    }

    pub fn has_local_keys(&self) -> bool {
        matches!(self.wallet_type, WalletType::Secrets | WalletType::Ledger)
    }
}
