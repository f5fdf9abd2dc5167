//! Error types shared by every account adapter.
//!
//! Adapters translate their venue-specific failures into [`AdapterError`] so the
//! reconciler can apply one policy regardless of exchange.

use thiserror::Error;

/// Errors that can occur when talking to an exchange account.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Order or account operation rejected by the exchange.
    #[error("rejected: {reason}")]
    Rejected {
        /// Rejection reason from exchange.
        reason: String,
    },

    /// No open position exists for the symbol.
    #[error("no open position for {symbol}")]
    NoPosition {
        /// Exchange symbol queried.
        symbol: String,
    },

    /// Operation is not available on this venue.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Call exceeded its time budget.
    #[error("timed out after {elapsed_ms}ms: {operation}")]
    Timeout {
        /// Name of the operation that timed out.
        operation: String,
        /// Budget that was exceeded.
        elapsed_ms: u64,
    },

    /// Network/connection error.
    #[error("network error: {0}")]
    Network(String),

    /// API communication error.
    #[error("API error: {status_code} - {message}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Error message from API.
        message: String,
    },

    /// Invalid order parameters.
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// Quantisation constants unavailable for a symbol.
    #[error("missing symbol metadata for {symbol}")]
    MissingMetadata {
        /// Exchange symbol.
        symbol: String,
    },
}

impl AdapterError {
    /// Creates a rejection error.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    /// Creates an API error from status code and message.
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            message: message.into(),
        }
    }

    /// Creates a missing metadata error.
    pub fn missing_metadata(symbol: impl Into<String>) -> Self {
        Self::MissingMetadata {
            symbol: symbol.into(),
        }
    }

    /// Returns true if the error indicates the request may succeed next cycle.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout { .. } => true,
            Self::Api { status_code, .. } => *status_code >= 500 || *status_code == 429,
            _ => false,
        }
    }
}

/// Result type alias for adapter operations.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;
