use serde::{Deserialize, Serialize};

use crate::account::AccountId;

/// Permission class of a proxy grant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProxyType {
    Any,
    NonTransfer,
    Governance,
    Staking,
    CancelProxy,
    Auction,
    NominationPools,
    Other(String),
}

impl ProxyType {
    /// Whether a grant of this type may sign the full range of calls of `required`
    pub fn covers(&self, required: &ProxyType) -> bool {
        match (self, required) {
            (ProxyType::Any, _) => true,
            (ProxyType::NonTransfer, ProxyType::Any) => false,
            (ProxyType::NonTransfer, _) => true,
            (granted, required) => granted == required,
        }
    }

    /// Maps a runtime enum variant name such as `NonTransfer`
    pub fn from_runtime_name(name: &str) -> Self {
        match name {
            "Any" => ProxyType::Any,
            "NonTransfer" => ProxyType::NonTransfer,
            "Governance" => ProxyType::Governance,
            "Staking" => ProxyType::Staking,
            "CancelProxy" => ProxyType::CancelProxy,
            "Auction" => ProxyType::Auction,
            "NominationPools" => ProxyType::NominationPools,
            other => ProxyType::Other(other.to_string()),
        }
    }
}

/// A proxy grant read from chain storage: `proxy` may act for `proxied`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredProxy {
    pub proxied: AccountId,
    pub proxy: AccountId,
    pub proxy_type: ProxyType,
    /// Announcement delay in blocks
    pub delay: u32,
}

impl DiscoveredProxy {
    pub fn has_delay(&self) -> bool {
        self.delay > 0
    }
}
