use thiserror::Error;
use wallet_connection::ConnectionError;
use wallet_core::CoreError;
use wallet_sync::SyncError;
use wallet_types::AccountId;

use crate::signer::SigningError;

#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("Connection error: {0}")]
    ConnectionError(#[from] ConnectionError),

    #[error("Sync error: {0}")]
    SyncError(#[from] SyncError),

    #[error("Core wallet error: {0}")]
    CoreError(#[from] CoreError),

    #[error("Signing error: {0}")]
    SigningError(#[from] SigningError),

    /// The signer finished without producing a signature
    #[error("Extrinsic is not signed")]
    NotSigned,

    #[error("No local wallet controls delegate {0}")]
    DelegateNotFound(AccountId),

    #[error("Sender resolution failed: {0}")]
    SenderResolutionError(String),

    #[error("Chain not found: {0}")]
    ChainNotFound(String),

    #[error("Extrinsic error: {0}")]
    ExtrinsicError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type AgentResult<T> = Result<T, AgentError>;
