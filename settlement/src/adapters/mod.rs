//! Rail adapter contracts
//!
//! The router only sees [`RailExecutor`]; reconciliation only sees
//! [`RailQuery`]. Wire protocols of the individual rails live behind these
//! traits.

pub mod mock;

use crate::types::{Recipient, Rail, SettlementFailure, SettlementStatus, TenantId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub use mock::{MockOutcome, MockRail};

/// Result type for adapter calls
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Adapter errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    /// Call exceeded its time bound
    #[error("Timeout after {seconds}s")]
    Timeout {
        /// Time bound in seconds
        seconds: u64,
    },

    /// Connection refused/reset
    #[error("Connection error: {0}")]
    Connection(String),

    /// HTTP-style status from the rail API
    #[error("Rail API error {status}: {message}")]
    Http {
        /// Status code
        status: u16,
        /// Message
        message: String,
    },

    /// Explicit business rejection by the rail
    #[error("Rejected by rail ({code}): {message}")]
    Rejected {
        /// Rail reason code
        code: String,
        /// Message
        message: String,
    },

    /// Beneficiary account is invalid or closed
    #[error("Invalid account: {0}")]
    InvalidAccount(String),

    /// No adapter registered for the rail
    #[error("No adapter registered for {0}")]
    NotRegistered(Rail),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl AdapterError {
    /// Stable machine code
    pub fn code(&self) -> &'static str {
        match self {
            AdapterError::Timeout { .. } => "ADAPTER_TIMEOUT",
            AdapterError::Connection(_) => "ADAPTER_CONNECTION",
            AdapterError::Http { .. } => "ADAPTER_HTTP",
            AdapterError::Rejected { .. } => "RAIL_REJECTED",
            AdapterError::InvalidAccount(_) => "INVALID_ACCOUNT",
            AdapterError::NotRegistered(_) => "ADAPTER_NOT_REGISTERED",
            AdapterError::Other(_) => "ADAPTER_ERROR",
        }
    }

    /// Network, timeout and 5xx/gateway-style failures
    pub fn is_transient(&self) -> bool {
        match self {
            AdapterError::Timeout { .. } | AdapterError::Connection(_) => true,
            AdapterError::Http { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            AdapterError::Rejected { .. }
            | AdapterError::InvalidAccount(_)
            | AdapterError::NotRegistered(_) => false,
            AdapterError::Other(msg) => message_signals_transient(msg),
        }
    }
}

/// Transient signals in free-text rail errors
pub fn message_signals_transient(message: &str) -> bool {
    const SIGNALS: [&str; 10] = [
        "timeout",
        "timed out",
        "econnrefused",
        "econnreset",
        "connection",
        "network",
        "502",
        "503",
        "504",
        "gateway",
    ];
    let lower = message.to_lowercase();
    SIGNALS.iter().any(|s| lower.contains(s))
}

/// Payload handed to an executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RailExecutionRequest {
    /// Settlement ID
    pub settlement_id: Uuid,
    /// Transfer ID, the idempotency key together with the rail
    pub transfer_id: Uuid,
    /// Tenant
    pub tenant_id: TenantId,
    /// Rail
    pub rail: Rail,
    /// Gross amount
    pub amount: Decimal,
    /// Fee retained
    pub fee: Decimal,
    /// Amount delivered
    pub net_amount: Decimal,
    /// Source currency
    pub currency: String,
    /// Destination currency
    pub destination_currency: Option<String>,
    /// Recipient
    pub recipient: Option<Recipient>,
    /// Attempt number (0 = first)
    pub attempt: u32,
}

/// Executor response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RailExecutionResult {
    /// Rail-side identifier
    pub external_id: String,
    /// Status reported by the rail
    pub status: SettlementStatus,
    /// Expected completion for asynchronous rails
    pub estimated_completion: Option<DateTime<Utc>>,
    /// Failure details when `status` is failed
    pub error: Option<SettlementFailure>,
}

/// A transaction as the rail sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTransaction {
    /// Rail-side identifier
    pub external_id: String,
    /// Transfer ID echoed back by the rail, when it supports references
    pub transfer_id: Option<Uuid>,
    /// Amount moved
    pub amount: Decimal,
    /// Rail status
    pub status: SettlementStatus,
    /// Submission time on the rail
    pub submitted_at: DateTime<Utc>,
    /// Completion time on the rail
    pub completed_at: Option<DateTime<Utc>>,
    /// Raw rail payload
    pub raw: serde_json::Value,
}

/// Adapter health
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Healthy flag
    pub healthy: bool,
    /// Optional detail
    pub message: Option<String>,
}

/// Submits transfers to one rail
#[async_trait]
pub trait RailExecutor: Send + Sync {
    /// Rail served
    fn rail(&self) -> Rail;

    /// Submit a transfer. Must be idempotent per `(transfer_id, rail)`.
    async fn execute(&self, request: &RailExecutionRequest) -> AdapterResult<RailExecutionResult>;
}

/// Read-only view of one rail
#[async_trait]
pub trait RailQuery: Send + Sync {
    /// Rail served
    fn rail(&self) -> Rail;

    /// Transactions submitted in `[period_start, period_end)`
    async fn list_transactions(
        &self,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> AdapterResult<Vec<ExternalTransaction>>;

    /// Liveness of the rail API
    async fn health_check(&self) -> AdapterResult<HealthStatus>;
}

/// Adapters keyed by rail
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    executors: HashMap<Rail, Arc<dyn RailExecutor>>,
    queries: HashMap<Rail, Arc<dyn RailQuery>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("executors", &self.executors.keys().collect::<Vec<_>>())
            .field("queries", &self.queries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AdapterRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor
    pub fn register_executor(&mut self, executor: Arc<dyn RailExecutor>) {
        self.executors.insert(executor.rail(), executor);
    }

    /// Register a query adapter
    pub fn register_query(&mut self, query: Arc<dyn RailQuery>) {
        self.queries.insert(query.rail(), query);
    }

    /// Register a mock serving both roles
    pub fn register_mock(&mut self, mock: Arc<MockRail>) {
        let rail = RailExecutor::rail(mock.as_ref());
        self.executors.insert(rail, mock.clone());
        self.queries.insert(rail, mock);
    }

    /// Registry with a fresh mock on every rail
    pub fn with_mocks() -> (Self, HashMap<Rail, Arc<MockRail>>) {
        let mut registry = Self::new();
        let mut mocks = HashMap::new();
        for rail in Rail::ALL {
            let mock = Arc::new(MockRail::new(rail));
            registry.register_mock(mock.clone());
            mocks.insert(rail, mock);
        }
        (registry, mocks)
    }

    /// Executor for a rail
    pub fn executor(&self, rail: Rail) -> AdapterResult<Arc<dyn RailExecutor>> {
        self.executors
            .get(&rail)
            .cloned()
            .ok_or(AdapterError::NotRegistered(rail))
    }

    /// Query adapter for a rail
    pub fn query(&self, rail: Rail) -> AdapterResult<Arc<dyn RailQuery>> {
        self.queries
            .get(&rail)
            .cloned()
            .ok_or(AdapterError::NotRegistered(rail))
    }

    /// Whether an executor is registered
    pub fn has_executor(&self, rail: Rail) -> bool {
        self.executors.contains_key(&rail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AdapterError::Timeout { seconds: 5 }.is_transient());
        assert!(AdapterError::Connection("reset".into()).is_transient());
        assert!(AdapterError::Http { status: 503, message: "down".into() }.is_transient());
        assert!(!AdapterError::Http { status: 400, message: "bad".into() }.is_transient());
        assert!(!AdapterError::Rejected { code: "AC04".into(), message: "closed".into() }.is_transient());
        assert!(!AdapterError::InvalidAccount("123".into()).is_transient());
        assert!(AdapterError::Other("upstream gateway error".into()).is_transient());
        assert!(!AdapterError::Other("duplicate beneficiary".into()).is_transient());
    }

    #[test]
    fn test_registry_lookup() {
        let (registry, mocks) = AdapterRegistry::with_mocks();
        assert_eq!(mocks.len(), Rail::ALL.len());
        assert!(registry.has_executor(Rail::Pix));
        assert!(registry.query(Rail::Sepa).is_ok());

        let empty = AdapterRegistry::new();
        assert_eq!(
            empty.executor(Rail::Pix).err(),
            Some(AdapterError::NotRegistered(Rail::Pix))
        );
    }
}
