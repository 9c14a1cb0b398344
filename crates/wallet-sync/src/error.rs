use thiserror::Error;
use wallet_connection::ConnectionError;
use wallet_core::CoreError;

#[derive(Error, Debug, Clone)]
pub enum SyncError {
    #[error("Connection error: {0}")]
    ConnectionError(#[from] ConnectionError),

    #[error("HTTP client error: {0}")]
    HttpError(String),

    #[error("Indexer error: {0}")]
    IndexerError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Core wallet error: {0}")]
    CoreError(#[from] CoreError),
}

pub type SyncResult<T> = Result<T, SyncError>;
