//! Domain events
//!
//! Publishing is best-effort: callers log sink failures and carry on, the
//! ledger stays the source of truth.

use crate::reconciliation::{
    DiscrepancyType, ReconciliationDiscrepancy, ReconciliationReport, ReportStatus, Severity,
};
use crate::types::{Rail, SettlementRecord, SettlementStatus, TenantId};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Settlement lifecycle payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementEventPayload {
    /// Settlement ID
    pub settlement_id: Uuid,
    /// Transfer ID
    pub transfer_id: Uuid,
    /// Tenant
    pub tenant_id: TenantId,
    /// Rail
    pub rail: Rail,
    /// Status at emission
    pub status: SettlementStatus,
    /// Gross amount
    pub amount: Decimal,
    /// Currency
    pub currency: String,
    /// Fees
    pub fees: Decimal,
    /// Failure code, for failed events
    pub error_code: Option<String>,
    /// Emission time
    pub timestamp: DateTime<Utc>,
}

impl From<&SettlementRecord> for SettlementEventPayload {
    fn from(r: &SettlementRecord) -> Self {
        Self {
            settlement_id: r.id,
            transfer_id: r.transfer_id,
            tenant_id: r.tenant_id.clone(),
            rail: r.rail,
            status: r.status,
            amount: r.gross_amount,
            currency: r.currency.clone(),
            fees: r.fee_amount,
            error_code: r.last_error.as_ref().map(|e| e.code.clone()),
            timestamp: Utc::now(),
        }
    }
}

/// Engine events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SettlementEvent {
    /// Submitted to a rail
    #[serde(rename = "settlement.initiated")]
    Initiated(SettlementEventPayload),

    /// Settled on the rail
    #[serde(rename = "settlement.completed")]
    Completed(SettlementEventPayload),

    /// Terminally failed
    #[serde(rename = "settlement.failed")]
    Failed(SettlementEventPayload),

    /// Reconciliation run finished
    #[serde(rename = "reconciliation.completed")]
    ReconciliationCompleted {
        /// Report ID
        report_id: Uuid,
        /// Tenant scope
        tenant_id: Option<TenantId>,
        /// Rail
        rail: Rail,
        /// Final status
        status: ReportStatus,
        /// Discrepancies found
        discrepancy_count: usize,
    },

    /// Discrepancy detected
    #[serde(rename = "reconciliation.discrepancy")]
    Discrepancy {
        /// Discrepancy ID
        discrepancy_id: Uuid,
        /// Report ID
        report_id: Uuid,
        /// Rail
        rail: Rail,
        /// Kind
        kind: DiscrepancyType,
        /// Severity
        severity: Severity,
        /// Description
        description: String,
    },
}

impl SettlementEvent {
    /// Subject-style name
    pub fn name(&self) -> &'static str {
        match self {
            SettlementEvent::Initiated(_) => "settlement.initiated",
            SettlementEvent::Completed(_) => "settlement.completed",
            SettlementEvent::Failed(_) => "settlement.failed",
            SettlementEvent::ReconciliationCompleted { .. } => "reconciliation.completed",
            SettlementEvent::Discrepancy { .. } => "reconciliation.discrepancy",
        }
    }

    /// Event for a finished report
    pub fn reconciliation_completed(report: &ReconciliationReport) -> Self {
        SettlementEvent::ReconciliationCompleted {
            report_id: report.id,
            tenant_id: report.tenant_id.clone(),
            rail: report.rail,
            status: report.status,
            discrepancy_count: report.discrepancy_count,
        }
    }

    /// Event for a discrepancy
    pub fn discrepancy(d: &ReconciliationDiscrepancy) -> Self {
        SettlementEvent::Discrepancy {
            discrepancy_id: d.id,
            report_id: d.report_id,
            rail: d.rail,
            kind: d.kind,
            severity: d.severity,
            description: d.description.clone(),
        }
    }
}

/// Destination for engine events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish one event
    async fn publish(&self, event: SettlementEvent) -> Result<()>;
}

/// Logs events through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, event: SettlementEvent) -> Result<()> {
        let payload = serde_json::to_string(&event)?;
        info!(event = event.name(), %payload, "Settlement event");
        Ok(())
    }
}

/// Forwards events into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<SettlementEvent>,
}

impl ChannelEventSink {
    /// Sink plus the receiving end
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SettlementEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn publish(&self, event: SettlementEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|e| crate::Error::Other(format!("event channel closed: {}", e.0.name())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_and_wire_name() {
        let (sink, mut rx) = ChannelEventSink::new();
        let event = SettlementEvent::ReconciliationCompleted {
            report_id: Uuid::new_v4(),
            tenant_id: None,
            rail: Rail::Ach,
            status: ReportStatus::Completed,
            discrepancy_count: 0,
        };
        sink.publish(event.clone()).await.unwrap();
        assert_eq!(rx.recv().await, Some(event.clone()));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "reconciliation.completed");

        drop(rx);
        assert!(sink.publish(event).await.is_err());
    }
}
