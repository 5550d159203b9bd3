//! Bastion Error - Unified Error Types
//!
//! Error handling for every Bastion operation. Categorizes errors by domain
//! (configuration, connectivity, query, transaction, serialization, secrets)
//! and provides helpers for retryability and error classification.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use thiserror::Error;

/// SQLSTATE for `duplicate_table`.
pub const SQLSTATE_DUPLICATE_TABLE: &str = "42P07";

/// SQLSTATE for `unique_violation`.
pub const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";

// =============================================================================
// Error Types
// =============================================================================

/// Unified error type for all Bastion operations.
#[derive(Error, Debug)]
pub enum BastionError {
    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    // Connectivity errors
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connection pool timeout")]
    PoolTimeout,

    #[error("timeout: {0}")]
    Timeout(String),

    // Query errors
    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("database error [{code}]: {message}")]
    Database { code: String, message: String },

    #[error("unknown operator: {0}")]
    UnknownOperator(String),

    #[error("invalid operands for {operator}: {reason}")]
    InvalidOperands { operator: String, reason: String },

    // Transaction errors
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    #[error("update rejected: {0}")]
    UpdateRejected(String),

    // Data errors
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("malformed document {key}: {reason}")]
    MalformedDocument { key: String, reason: String },

    #[error("mismatched batch: {items} items for {keys} keys")]
    MismatchedBatch { items: usize, keys: usize },

    // Secret errors
    #[error("encryption error: {0}")]
    Encryption(String),

    // Leadership errors
    #[error("leadership lost: {0}")]
    LeadershipLost(String),

    #[error("internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Type Aliases
// =============================================================================

/// Result type alias for Bastion operations.
pub type Result<T> = std::result::Result<T, BastionError>;

// =============================================================================
// Conversions
// =============================================================================

impl From<sqlx::Error> for BastionError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => BastionError::PoolTimeout,
            sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => BastionError::ConnectionClosed,
            sqlx::Error::Io(e) => BastionError::ConnectionFailed(e.to_string()),
            sqlx::Error::Tls(e) => BastionError::ConnectionFailed(e.to_string()),
            sqlx::Error::Configuration(e) => BastionError::Configuration(e.to_string()),
            sqlx::Error::Database(db) => BastionError::Database {
                code: db.code().map(|c| c.into_owned()).unwrap_or_default(),
                message: db.message().to_string(),
            },
            other => BastionError::QueryFailed(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for BastionError {
    fn from(err: serde_json::Error) -> Self {
        BastionError::Serialization(err.to_string())
    }
}

// =============================================================================
// Error Classification
// =============================================================================

impl BastionError {
    /// Returns true if the operation can be safely retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BastionError::ConnectionFailed(_)
                | BastionError::ConnectionClosed
                | BastionError::PoolTimeout
                | BastionError::Timeout(_)
        )
    }

    /// Wrap a failed commit.
    pub fn transaction(err: impl std::fmt::Display) -> Self {
        BastionError::TransactionFailed(err.to_string())
    }

    /// Returns true if this is a user error (vs system error).
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            BastionError::Configuration(_)
                | BastionError::InvalidUrl(_)
                | BastionError::InvalidIdentifier(_)
                | BastionError::UnknownOperator(_)
                | BastionError::InvalidOperands { .. }
                | BastionError::MismatchedBatch { .. }
                | BastionError::UpdateRejected(_)
        )
    }

    /// The SQLSTATE code of a database error, if any.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            BastionError::Database { code, .. } if !code.is_empty() => Some(code),
            _ => None,
        }
    }

    /// Returns true if a create-if-absent race lost to a concurrent creator.
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self.sqlstate(),
            Some(SQLSTATE_DUPLICATE_TABLE) | Some(SQLSTATE_UNIQUE_VIOLATION)
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
