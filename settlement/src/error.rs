//! Error types for the settlement engine

use crate::adapters::AdapterError;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Amount is zero, negative or otherwise malformed
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// No rail survived country, amount and availability filtering
    #[error("No rails available for {country} (amount {amount})")]
    NoRailsAvailable {
        /// Destination country used for eligibility
        country: String,
        /// Requested amount
        amount: Decimal,
    },

    /// Unknown rail identifier
    #[error("Unknown rail: {0}")]
    UnknownRail(String),

    /// Unknown protocol identifier
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    /// Settlement status would regress
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Another attempt for the same settlement holds the execution lease
    #[error("Execution already in progress for settlement {0}")]
    ExecutionInProgress(Uuid),

    /// Entity lookup failed
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Transfer already queued on this rail
    #[error("Transfer {transfer_id} already queued on {rail}")]
    AlreadyQueued {
        /// Transfer ID
        transfer_id: Uuid,
        /// Rail
        rail: String,
    },

    /// Unique key collision in the store
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A reconciliation run for the same key is already running
    #[error("Reconciliation already running for {rail} {period}")]
    ReconciliationInProgress {
        /// Rail
        rail: String,
        /// Period description
        period: String,
    },

    /// Discrepancy was already resolved
    #[error("Discrepancy {0} already resolved")]
    AlreadyResolved(Uuid),

    /// Operator lacks the role for the operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Period end is not after period start
    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    /// Window configuration is malformed
    #[error("Invalid window configuration: {0}")]
    InvalidWindowConfig(String),

    /// Timezone name not found in the tz database
    #[error("Unknown timezone: {0}")]
    Timezone(String),

    /// Rail adapter failure
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// Store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidAmount(_) => "INVALID_AMOUNT",
            Error::NoRailsAvailable { .. } => "NO_RAILS_AVAILABLE",
            Error::UnknownRail(_) => "UNKNOWN_RAIL",
            Error::UnknownProtocol(_) => "UNKNOWN_PROTOCOL",
            Error::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            Error::ExecutionInProgress(_) => "EXECUTION_IN_PROGRESS",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::AlreadyQueued { .. } => "ALREADY_QUEUED",
            Error::Conflict(_) => "CONFLICT",
            Error::ReconciliationInProgress { .. } => "RECONCILIATION_IN_PROGRESS",
            Error::AlreadyResolved(_) => "ALREADY_RESOLVED",
            Error::Unauthorized(_) => "UNAUTHORIZED",
            Error::InvalidPeriod(_) => "INVALID_PERIOD",
            Error::InvalidWindowConfig(_) => "INVALID_WINDOW_CONFIG",
            Error::Timezone(_) => "UNKNOWN_TIMEZONE",
            Error::Adapter(e) => e.code(),
            Error::Store(_) => "STORE_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller may retry the same operation later
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Adapter(e) => e.is_transient(),
            Error::ExecutionInProgress(_) | Error::Store(_) => true,
            _ => false,
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        let err = Error::NoRailsAvailable {
            country: "BR".to_string(),
            amount: Decimal::new(100, 0),
        };
        assert_eq!(err.code(), "NO_RAILS_AVAILABLE");
        assert!(!err.is_retryable());

        let err: Error = AdapterError::Timeout { seconds: 30 }.into();
        assert_eq!(err.code(), "ADAPTER_TIMEOUT");
        assert!(err.is_retryable());
    }
}
