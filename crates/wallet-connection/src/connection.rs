use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wallet_types::ChainNode;

use crate::error::ConnectionResult;

/// Lifecycle of a chain connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    NotConnected,
    Connecting,
    Connected,
    WaitingReconnection,
}

/// Process-unique identity of a connection instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Receives state transitions of a connection, in emission order
pub trait ConnectionStateDelegate: Send + Sync {
    fn connection_state_did_change(&self, connection_id: ConnectionId, state: ConnectionState);
}

/// A live or reconnecting RPC session bound to one chain
#[async_trait]
pub trait ChainConnection: Send + Sync {
    fn id(&self) -> ConnectionId;

    fn state(&self) -> ConnectionState;

    /// Replaces the ranked node list; lower `order` is tried first
    fn change_nodes(&self, nodes: Vec<ChainNode>);

    fn set_delegate(&self, delegate: Option<Weak<dyn ConnectionStateDelegate>>);

    /// Starts connecting unless already connected or connecting
    fn connect(&self);

    fn disconnect(&self);

    async fn send(&self, method: &str, params: Value) -> ConnectionResult<Value>;
}
