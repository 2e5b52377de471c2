//! Scripted in-process rail used by the sweeper binary and tests

use super::{
    AdapterError, AdapterResult, ExternalTransaction, HealthStatus, RailExecutionRequest,
    RailExecutionResult, RailExecutor, RailQuery,
};
use crate::types::{Rail, SettlementFailure, SettlementStatus};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Next response the mock should produce
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Settle synchronously
    Complete,
    /// Accept and leave processing
    Pending,
    /// Fail the call with an adapter error
    Fail(AdapterError),
    /// Return a `failed` status with structured details
    RailFailed(SettlementFailure),
}

#[derive(Debug)]
struct MockState {
    script: VecDeque<MockOutcome>,
    executed: HashMap<Uuid, RailExecutionResult>,
    ledger: Vec<ExternalTransaction>,
    health: HealthStatus,
    listing_error: Option<AdapterError>,
}

/// In-process rail
#[derive(Debug)]
pub struct MockRail {
    rail: Rail,
    latency: Duration,
    default_outcome: MockOutcome,
    calls: AtomicU32,
    state: Mutex<MockState>,
}

impl MockRail {
    /// Mock that completes every transfer
    pub fn new(rail: Rail) -> Self {
        Self {
            rail,
            latency: Duration::ZERO,
            default_outcome: MockOutcome::Complete,
            calls: AtomicU32::new(0),
            state: Mutex::new(MockState {
                script: VecDeque::new(),
                executed: HashMap::new(),
                ledger: Vec::new(),
                health: HealthStatus {
                    healthy: true,
                    message: None,
                },
                listing_error: None,
            }),
        }
    }

    /// Delay every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Outcome when the script is empty
    pub fn with_default_outcome(mut self, outcome: MockOutcome) -> Self {
        self.default_outcome = outcome;
        self
    }

    /// Queue the next outcome
    pub async fn push_outcome(&self, outcome: MockOutcome) {
        self.state.lock().await.script.push_back(outcome);
    }

    /// Number of `execute` calls
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Add a transaction to the rail's feed
    pub async fn insert_transaction(&self, tx: ExternalTransaction) {
        self.state.lock().await.ledger.push(tx);
    }

    /// Overwrite the status the rail reports
    pub async fn set_transaction_status(&self, external_id: &str, status: SettlementStatus) {
        let mut state = self.state.lock().await;
        if let Some(tx) = state.ledger.iter_mut().find(|tx| tx.external_id == external_id) {
            tx.status = status;
        }
    }

    /// Overwrite the amount the rail reports
    pub async fn set_transaction_amount(&self, external_id: &str, amount: Decimal) {
        let mut state = self.state.lock().await;
        if let Some(tx) = state.ledger.iter_mut().find(|tx| tx.external_id == external_id) {
            tx.amount = amount;
        }
    }

    /// Drop a transaction from the rail's feed
    pub async fn remove_transaction(&self, external_id: &str) {
        self.state
            .lock()
            .await
            .ledger
            .retain(|tx| tx.external_id != external_id);
    }

    /// Snapshot of the rail's feed
    pub async fn transactions(&self) -> Vec<ExternalTransaction> {
        self.state.lock().await.ledger.clone()
    }

    /// Set health reported by `health_check`
    pub async fn set_health(&self, healthy: bool, message: Option<String>) {
        self.state.lock().await.health = HealthStatus { healthy, message };
    }

    /// Make `list_transactions` fail
    pub async fn fail_listing(&self, error: Option<AdapterError>) {
        self.state.lock().await.listing_error = error;
    }

    fn external_id(&self) -> String {
        format!("{}-{}", self.rail.as_str().to_uppercase(), Uuid::new_v4())
    }
}

#[async_trait]
impl RailExecutor for MockRail {
    fn rail(&self) -> Rail {
        self.rail
    }

    async fn execute(&self, request: &RailExecutionRequest) -> AdapterResult<RailExecutionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state.lock().await;

        if let Some(previous) = state.executed.get(&request.transfer_id) {
            info!(
                rail = %self.rail,
                transfer_id = %request.transfer_id,
                "Mock rail: replaying idempotent result"
            );
            return Ok(previous.clone());
        }

        let outcome = state
            .script
            .pop_front()
            .unwrap_or_else(|| self.default_outcome.clone());
        let now = Utc::now();

        let (status, estimated_completion) = match outcome {
            MockOutcome::Complete => (SettlementStatus::Completed, None),
            MockOutcome::Pending => (
                SettlementStatus::Processing,
                Some(now + ChronoDuration::seconds(60)),
            ),
            MockOutcome::Fail(err) => {
                warn!(rail = %self.rail, transfer_id = %request.transfer_id, "Mock rail: simulated failure {}", err);
                return Err(err);
            }
            MockOutcome::RailFailed(failure) => {
                return Ok(RailExecutionResult {
                    external_id: self.external_id(),
                    status: SettlementStatus::Failed,
                    estimated_completion: None,
                    error: Some(failure),
                });
            }
        };

        let external_id = self.external_id();
        let result = RailExecutionResult {
            external_id: external_id.clone(),
            status,
            estimated_completion,
            error: None,
        };

        state.ledger.push(ExternalTransaction {
            external_id,
            transfer_id: Some(request.transfer_id),
            amount: request.net_amount,
            status,
            submitted_at: now,
            completed_at: (status == SettlementStatus::Completed).then_some(now),
            raw: serde_json::json!({
                "rail": self.rail,
                "currency": request.currency,
                "attempt": request.attempt,
            }),
        });
        state.executed.insert(request.transfer_id, result.clone());

        Ok(result)
    }
}

#[async_trait]
impl RailQuery for MockRail {
    fn rail(&self) -> Rail {
        self.rail
    }

    async fn list_transactions(
        &self,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> AdapterResult<Vec<ExternalTransaction>> {
        let state = self.state.lock().await;
        if let Some(err) = &state.listing_error {
            return Err(err.clone());
        }
        Ok(state
            .ledger
            .iter()
            .filter(|tx| tx.submitted_at >= period_start && tx.submitted_at < period_end)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> AdapterResult<HealthStatus> {
        Ok(self.state.lock().await.health.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TenantId;
    use rust_decimal_macros::dec;

    fn request() -> RailExecutionRequest {
        RailExecutionRequest {
            settlement_id: Uuid::new_v4(),
            transfer_id: Uuid::new_v4(),
            tenant_id: TenantId::new("tenant"),
            rail: Rail::Pix,
            amount: dec!(100),
            fee: dec!(0.7),
            net_amount: dec!(99.3),
            currency: "USD".to_string(),
            destination_currency: Some("BRL".to_string()),
            recipient: None,
            attempt: 0,
        }
    }

    #[tokio::test]
    async fn test_execute_is_idempotent_per_transfer() {
        let rail = MockRail::new(Rail::Pix);
        let req = request();

        let first = rail.execute(&req).await.unwrap();
        let second = rail.execute(&req).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.status, SettlementStatus::Completed);
        assert!(first.external_id.starts_with("PIX-"));
        assert_eq!(rail.transactions().await.len(), 1);
        assert_eq!(rail.call_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failure_then_success() {
        let rail = MockRail::new(Rail::Pix);
        rail.push_outcome(MockOutcome::Fail(AdapterError::Timeout { seconds: 1 })).await;
        let req = request();

        assert!(rail.execute(&req).await.is_err());
        assert!(rail.transactions().await.is_empty());
        assert!(rail.execute(&req).await.is_ok());
    }

    #[tokio::test]
    async fn test_listing_filters_period() {
        let rail = MockRail::new(Rail::Pix);
        rail.execute(&request()).await.unwrap();

        let now = Utc::now();
        let hour = ChronoDuration::hours(1);
        assert_eq!(rail.list_transactions(now - hour, now + hour).await.unwrap().len(), 1);
        assert!(rail.list_transactions(now + hour, now + hour * 2).await.unwrap().is_empty());

        rail.fail_listing(Some(AdapterError::Connection("refused".into()))).await;
        assert!(rail.list_transactions(now - hour, now + hour).await.is_err());
    }
}
