//! Queued transfers and per-window execution records

use crate::types::{Rail, SettlementRequest, TenantId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueuePriority {
    /// Normal
    #[default]
    Normal,
    /// High
    High,
    /// Urgent, bypasses window gating when drained
    Urgent,
}

impl QueuePriority {
    /// Drain order, lower first
    pub fn rank(&self) -> u8 {
        match self {
            QueuePriority::Urgent => 0,
            QueuePriority::High => 1,
            QueuePriority::Normal => 2,
        }
    }
}

/// Queue item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting for a window
    Queued,
    /// Claimed by a drain
    Processing,
    /// Submitted successfully
    Settled,
    /// Submission failed
    Failed,
}

impl QueueStatus {
    /// Still occupies the `(transfer_id, rail)` slot
    pub fn is_active(&self) -> bool {
        matches!(self, QueueStatus::Queued | QueueStatus::Processing)
    }
}

/// A transfer waiting for its rail's window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTransfer {
    /// Queue item ID
    pub id: Uuid,
    /// Tenant
    pub tenant_id: TenantId,
    /// Transfer ID
    pub transfer_id: Uuid,
    /// Settlement record the item belongs to
    pub settlement_id: Option<Uuid>,
    /// Rail
    pub rail: Rail,
    /// Gross amount
    pub amount: Decimal,
    /// Currency
    pub currency: String,
    /// Priority
    pub priority: QueuePriority,
    /// Status
    pub status: QueueStatus,
    /// Earliest submission time
    pub scheduled_for: DateTime<Utc>,
    /// Enqueue time
    pub enqueued_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
    /// Request snapshot
    pub request: SettlementRequest,
    /// Free-form annotations (emergency reason, operator)
    pub metadata: serde_json::Value,
}

/// Outcome of an execution batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Every item submitted
    Completed,
    /// Some items failed
    PartiallyFailed,
    /// Every item failed
    Failed,
}

/// One window's batch on one rail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementExecution {
    /// Execution ID
    pub id: Uuid,
    /// Rail
    pub rail: Rail,
    /// Window identifier, `{rail}_{YYYYmmdd_HHMM}`
    pub window_id: String,
    /// Window start
    pub scheduled_at: DateTime<Utc>,
    /// Drain start
    pub started_at: DateTime<Utc>,
    /// Drain end
    pub completed_at: DateTime<Utc>,
    /// Items processed
    pub transfer_count: usize,
    /// Gross amount processed
    pub total_amount: Decimal,
    /// Items submitted
    pub success_count: usize,
    /// Items failed
    pub failure_count: usize,
    /// Batch outcome
    pub status: ExecutionStatus,
}

impl SettlementExecution {
    /// Window identifier for a rail and window start
    pub fn window_id(rail: Rail, scheduled_at: DateTime<Utc>) -> String {
        format!("{}_{}", rail, scheduled_at.format("%Y%m%d_%H%M"))
    }

    /// Derive status from counts
    pub fn status_for(success_count: usize, failure_count: usize) -> ExecutionStatus {
        match (success_count, failure_count) {
            (_, 0) => ExecutionStatus::Completed,
            (0, _) => ExecutionStatus::Failed,
            _ => ExecutionStatus::PartiallyFailed,
        }
    }
}

/// Queue depth for one rail
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Items waiting
    pub depth: usize,
    /// Gross amount waiting
    pub amount: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_priority_rank() {
        let mut priorities = vec![QueuePriority::Normal, QueuePriority::Urgent, QueuePriority::High];
        priorities.sort_by_key(|p| p.rank());
        assert_eq!(
            priorities,
            vec![QueuePriority::Urgent, QueuePriority::High, QueuePriority::Normal]
        );
    }

    #[test]
    fn test_window_id_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 10, 14, 0, 0).unwrap();
        assert_eq!(SettlementExecution::window_id(Rail::Ach, at), "ach_20260310_1400");
    }

    #[test]
    fn test_execution_status() {
        assert_eq!(SettlementExecution::status_for(3, 0), ExecutionStatus::Completed);
        assert_eq!(SettlementExecution::status_for(0, 2), ExecutionStatus::Failed);
        assert_eq!(SettlementExecution::status_for(1, 1), ExecutionStatus::PartiallyFailed);
    }
}
