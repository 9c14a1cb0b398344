use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque network identifier (the genesis hash for substrate chains)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChainId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Index of an asset inside its chain's asset list
pub type AssetId = u32;

/// A single RPC endpoint of a chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainNode {
    pub url: String,
    pub name: String,
    /// Lower order means higher priority
    pub order: i16,
}

/// Which fee logic applies to paying fees in non-native assets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CustomFeeKind {
    /// Asset conversion pools against the native token
    AssetHub,
    /// Multi-transaction payment accepted currencies
    Hydration,
}

/// An external API endpoint advertised by chain metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalApi {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalApis {
    #[serde(default)]
    pub multisig: Option<ExternalApi>,
}

/// Chain metadata the delegated-signing core relies on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainModel {
    pub chain_id: ChainId,
    pub name: String,
    pub nodes: Vec<ChainNode>,
    #[serde(default)]
    pub native_asset_id: AssetId,
    #[serde(default)]
    pub custom_fee: Option<CustomFeeKind>,
    #[serde(default)]
    pub external_apis: ExternalApis,
}

impl ChainModel {
    pub fn new(chain_id: impl Into<String>, name: impl Into<String>, nodes: Vec<ChainNode>) -> Self {
        Self {
            chain_id: ChainId::new(chain_id),
            name: name.into(),
            nodes,
            native_asset_id: 0,
            custom_fee: None,
            external_apis: ExternalApis::default(),
        }
    }

    pub fn with_custom_fee(mut self, kind: CustomFeeKind) -> Self {
        self.custom_fee = Some(kind);
        self
    }

    pub fn with_multisig_api(mut self, url: impl Into<String>) -> Self {
        self.external_apis.multisig = Some(ExternalApi { url: url.into() });
        self
    }

    /// Nodes ordered by rank, ties keep metadata order
    pub fn sorted_nodes(&self) -> Vec<ChainNode> {
        let mut nodes = self.nodes.clone();
        nodes.sort_by_key(|node| node.order);
        nodes
    }

    pub fn supports_custom_fees(&self) -> bool {
        self.custom_fee.is_some()
    }

    pub fn multisig_api_url(&self) -> Option<&str> {
        self.external_apis.multisig.as_ref().map(|api| api.url.as_str())
    }
}
