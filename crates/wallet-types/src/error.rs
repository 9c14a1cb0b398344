use thiserror::Error;

/// Errors raised while parsing or validating shared models
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypesError {
    /// Input was not valid hex
    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    /// Decoded bytes had the wrong length
    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Shared result type
pub type TypesResult<T> = Result<T, TypesError>;
