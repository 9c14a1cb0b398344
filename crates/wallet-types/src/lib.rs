//! Shared models for the delegated-signing subsystem: chains, accounts,
//! wallets, and the multisig/proxy relationships discovered for them.

pub mod account;
pub mod chain;
pub mod error;
pub mod multisig;
pub mod proxy;
pub mod wallet;

pub use account::AccountId;
pub use chain::{AssetId, ChainId, ChainModel, ChainNode, CustomFeeKind, ExternalApis};
pub use error::{TypesError, TypesResult};
pub use multisig::{
    CallHash, DiscoveredMultisig, MultisigDefinition, PendingOperation, PendingOperationKey,
    Timepoint,
};
pub use proxy::{DiscoveredProxy, ProxyType};
pub use wallet::{ChainAccount, Delegation, MetaAccount, MetaId, WalletType};
