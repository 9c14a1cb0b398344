use std::sync::{Arc, Weak};

use reqwest::Client as HttpClient;
use tracing::debug;
use wallet_core::config::ConnectionConfig;
use wallet_types::ChainModel;

use crate::connection::{ChainConnection, ConnectionStateDelegate};
use crate::error::{ConnectionError, ConnectionResult};
use crate::rpc::JsonRpcConnection;

/// Builds a connection for one chain
pub trait ConnectionFactory: Send + Sync {
    fn create_connection(
        &self,
        chain: &ChainModel,
        delegate: Weak<dyn ConnectionStateDelegate>,
    ) -> ConnectionResult<Arc<dyn ChainConnection>>;
}

pub struct JsonRpcConnectionFactory {
    config: ConnectionConfig,
    http: HttpClient,
}

impl JsonRpcConnectionFactory {
    pub fn new(config: ConnectionConfig) -> ConnectionResult<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ConnectionError::UnknownError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, http })
    }
}

impl ConnectionFactory for JsonRpcConnectionFactory {
    fn create_connection(
        &self,
        chain: &ChainModel,
        delegate: Weak<dyn ConnectionStateDelegate>,
    ) -> ConnectionResult<Arc<dyn ChainConnection>> {
        debug!("Creating connection for {} with {} nodes", chain.name, chain.nodes.len());

        let connection = JsonRpcConnection::new(
            &chain.name,
            chain.sorted_nodes(),
            self.config.clone(),
            self.http.clone(),
        )?;
        connection.set_delegate(Some(delegate));

        Ok(Arc::new(connection))
    }
}
