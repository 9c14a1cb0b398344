pub mod call_store;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod observable;
pub mod runtime;
pub mod store;

pub use call_store::CallStore;
pub use config::WalletConfig;
pub use dispatch::DispatchQueue;
pub use error::{CoreError, CoreResult};
pub use observable::{Observable, SubscriptionId};
pub use runtime::{CoderFactory, RuntimeCall, RuntimeCodingService, StoragePath};
pub use store::{MemorySettingsRepository, MemoryWalletRepository, SettingsRepository, WalletRepository};
