//! Error types for `energy-indexer` operations.
//!
//! One `thiserror` enumeration covers every failure mode of the pipeline,
//! from configuration problems to ledger, cache and database failures.

use thiserror::Error;

/// Custom error type for indexer operations.
///
/// Variants map onto the failure taxonomy the workers act on: decode
/// failures are recovered locally, fetch and persistence failures are
/// written to `error_log`, and startup failures end the affected worker.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Errors encountered during database operations.
    ///
    /// Wraps `sqlx::Error` so that sink code can propagate with `?`.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// Errors from the dedup cache backend.
    #[error("Cache error: {0}")]
    CacheError(#[from] redis::RedisError),

    /// Instruction payload or event data could not be decoded.
    #[error("Decoding error: {0}")]
    DecodingError(String),

    /// Errors interacting with the ledger RPC endpoint.
    #[error("RPC error: {0}")]
    RpcError(String),

    /// Errors related to configuration.
    ///
    /// Missing settings, invalid values, or duplicate program entries.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Errors from environment variable operations.
    #[error("Environment variable error: {0}")]
    EnvVarError(#[from] std::env::VarError),

    /// Errors during Solana public key parsing.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(#[from] solana_sdk::pubkey::ParsePubkeyError),

    /// Errors from the Solana RPC client.
    #[error("RPC client error: {0}")]
    RpcClientError(Box<solana_client::client_error::ClientError>),

    /// Connection error (WebSocket drop, refused connection).
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Catch-all for failures that fit no other category.
    #[error("Internal error: {0}")]
    InternalError(String),

    /// The requested transaction is no longer served by the ledger.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// All retry attempts were exhausted on a transient error.
    #[error("Retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// Total number of attempts (initial call + retries).
        attempts: u32,
        /// String representation of the last error.
        last_error: String,
    },
}

/// Type alias for Results using `IndexerError`.
pub type Result<T> = std::result::Result<T, IndexerError>;

impl From<solana_client::client_error::ClientError> for IndexerError {
    fn from(err: solana_client::client_error::ClientError) -> Self {
        IndexerError::RpcClientError(Box::new(err))
    }
}

impl IndexerError {
    /// Short machine-friendly label used in `error_log` rows and stats.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            IndexerError::DatabaseError(_) => "database",
            IndexerError::CacheError(_) => "cache",
            IndexerError::DecodingError(_) => "decode",
            IndexerError::RpcError(_)
            | IndexerError::RpcClientError(_)
            | IndexerError::RetryExhausted { .. } => "rpc",
            IndexerError::ConfigError(_)
            | IndexerError::EnvVarError(_)
            | IndexerError::InvalidPublicKey(_) => "config",
            IndexerError::ConnectionError(_) => "connection",
            IndexerError::InternalError(_) => "internal",
            IndexerError::TransactionNotFound(_) => "not_found",
        }
    }
}
