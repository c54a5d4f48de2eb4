//! Error types for the order coordinator
//!
//! Order-domain failures (approval, wrap, staleness, submission) are not
//! errors: they are outcomes recorded in the ledger. The types here cover the
//! infrastructure underneath the coordinator.

use thiserror::Error;

/// Main error type for the coordinator service
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Transition stream closed while waiting on {id}")]
    SubscriptionClosed { id: String },

    #[error("Submission transport error: {0}")]
    Submission(String),

    #[error("Chain {chain_id} not found")]
    ChainNotFound { chain_id: u64 },

    #[error("Order {id} not found")]
    OrderNotFound { id: String },

    #[error("Transaction {id} not found")]
    TransactionNotFound { id: String },

    #[error("Order {id} already exists")]
    DuplicateOrder { id: String },

    #[error("Order {id} rejected: {reason}")]
    InvalidOrder { id: String, reason: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::ChainConnection { .. } | CoordinatorError::Database(_)
        )
    }
}

/// Result type for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
