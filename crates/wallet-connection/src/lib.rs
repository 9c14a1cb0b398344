//! Chain connections and the pool that shares them across the wallet.

pub mod connection;
pub mod error;
pub mod factory;
pub mod pool;
pub mod rpc;

pub use connection::{ChainConnection, ConnectionId, ConnectionState, ConnectionStateDelegate};
pub use error::{ConnectionError, ConnectionResult};
pub use factory::{ConnectionFactory, JsonRpcConnectionFactory};
pub use pool::{ConnectionPool, ConnectionStateSubscriber};
pub use rpc::JsonRpcConnection;

#[cfg(test)]
mod tests;
