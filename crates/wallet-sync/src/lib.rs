//! Discovery and caching of delegated accounts plus the pending multisig
//! operations they take part in.

pub mod cache;
pub mod error;
pub mod multisig;
pub mod pending;
pub mod proxy;

pub use cache::{DelegateMap, DelegateRecord, DelegatedAccountsCache};
pub use error::{SyncError, SyncResult};
pub use multisig::{MultisigAccountsRepository, MultisigIndexerClient, MultisigSource};
pub use pending::{PendingOperationChange, PendingOperationStore};
pub use proxy::{ChainProxyStorageSource, ProxyAccountsRepository, ProxyFetchOptions, ProxyStorageSource};

#[cfg(test)]
mod tests;
