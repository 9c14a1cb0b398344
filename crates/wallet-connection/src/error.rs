use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Construction failed, e.g. no usable node URL
    #[error("Unknown connection error: {0}")]
    UnknownError(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Request error: {0}")]
    RequestError(String),

    #[error("RPC error {code}: {message}")]
    RpcError { code: i64, message: String },

    #[error("Protocol error: {0}")]
    ProtocolError(String),
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;
