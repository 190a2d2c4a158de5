//! Error types for the provisioner

use thiserror::Error;

/// Main error type for the provisioner
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The execution channel failed to open or dropped mid-stream
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// An inbound event did not match the expected shape
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The remote side reported `complete` with `status = error`
    #[error("Operation failed: {0}")]
    OperationFailure(String),

    /// Both state backings rejected a write or delete
    #[error("State storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A stored document failed structural validation
    #[error("State corruption: {0}")]
    StateCorruption(String),

    /// A second execution was requested while one is still open
    #[error("Execution already in progress: {0}")]
    ExecutionInProgress(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}
