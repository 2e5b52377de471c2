//! Reconciliation reports and discrepancies

use crate::types::{Rail, SettlementStatus, TenantId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Kind of discrepancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyType {
    /// Amounts differ beyond tolerance
    AmountMismatch,
    /// Ledger and rail disagree on status
    StatusMismatch,
    /// Ledger has it, rail does not
    MissingInRail,
    /// Rail has it, ledger does not
    MissingInLedger,
}

impl DiscrepancyType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscrepancyType::AmountMismatch => "amount_mismatch",
            DiscrepancyType::StatusMismatch => "status_mismatch",
            DiscrepancyType::MissingInRail => "missing_in_rail",
            DiscrepancyType::MissingInLedger => "missing_in_ledger",
        }
    }
}

impl fmt::Display for DiscrepancyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discrepancy severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Low
    Low,
    /// Medium
    Medium,
    /// High
    High,
    /// Critical
    Critical,
}

impl Severity {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// In progress, holds the run lock
    Running,
    /// Finished
    Completed,
    /// Aborted by an error
    Failed,
}

/// Resolution state of a discrepancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    /// Awaiting review
    Open,
    /// Closed by an operator or auto-resolution
    Resolved,
}

/// One reconciliation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Report ID
    pub id: Uuid,
    /// Tenant scope; `None` reconciles every tenant on the rail
    pub tenant_id: Option<TenantId>,
    /// Rail
    pub rail: Rail,
    /// Period start (inclusive)
    pub period_start: DateTime<Utc>,
    /// Period end (exclusive)
    pub period_end: DateTime<Utc>,
    /// Status
    pub status: ReportStatus,
    /// Ledger records examined
    pub total_transactions: usize,
    /// External transactions examined
    pub external_transactions: usize,
    /// Ledger records matched without discrepancy
    pub matched_count: usize,
    /// Discrepancies found
    pub discrepancy_count: usize,
    /// Net amount of completed ledger records
    pub expected_total: Decimal,
    /// Amount of completed external transactions
    pub actual_total: Decimal,
    /// `actual_total - expected_total`
    pub difference: Decimal,
    /// Counts per type
    pub by_type: BTreeMap<DiscrepancyType, usize>,
    /// Counts per severity
    pub by_severity: BTreeMap<Severity, usize>,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration
    pub duration_ms: Option<u64>,
    /// Failure reason for failed runs
    pub error_message: Option<String>,
}

impl ReconciliationReport {
    /// Fresh running report
    pub fn start(
        tenant_id: Option<TenantId>,
        rail: Rail,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            rail,
            period_start,
            period_end,
            status: ReportStatus::Running,
            total_transactions: 0,
            external_transactions: 0,
            matched_count: 0,
            discrepancy_count: 0,
            expected_total: Decimal::ZERO,
            actual_total: Decimal::ZERO,
            difference: Decimal::ZERO,
            by_type: BTreeMap::new(),
            by_severity: BTreeMap::new(),
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            error_message: None,
        }
    }

    /// Tally discrepancies into the breakdown maps
    pub fn tally(&mut self, discrepancies: &[ReconciliationDiscrepancy]) {
        self.discrepancy_count = discrepancies.len();
        self.by_type.clear();
        self.by_severity.clear();
        for d in discrepancies {
            *self.by_type.entry(d.kind).or_insert(0) += 1;
            *self.by_severity.entry(d.severity).or_insert(0) += 1;
        }
    }

    /// Close the report
    pub fn finish(&mut self, status: ReportStatus, error_message: Option<String>) {
        let now = Utc::now();
        self.status = status;
        self.error_message = error_message;
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
    }
}

/// A single disagreement between ledger and rail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationDiscrepancy {
    /// Discrepancy ID
    pub id: Uuid,
    /// Report that found it
    pub report_id: Uuid,
    /// Tenant, when known
    pub tenant_id: Option<TenantId>,
    /// Rail
    pub rail: Rail,
    /// Kind
    #[serde(rename = "type")]
    pub kind: DiscrepancyType,
    /// Severity
    pub severity: Severity,
    /// Ledger record
    pub settlement_id: Option<Uuid>,
    /// Transfer ID
    pub transfer_id: Option<Uuid>,
    /// Rail identifier
    pub external_id: Option<String>,
    /// Ledger amount
    pub expected_amount: Option<Decimal>,
    /// Rail amount
    pub actual_amount: Option<Decimal>,
    /// Ledger status
    pub expected_status: Option<SettlementStatus>,
    /// Rail status
    pub actual_status: Option<SettlementStatus>,
    /// Human-readable description
    pub description: String,
    /// Detection time
    pub detected_at: DateTime<Utc>,
    /// Resolution state
    pub resolution: ResolutionStatus,
    /// Who resolved it
    pub resolved_by: Option<String>,
    /// When it was resolved
    pub resolved_at: Option<DateTime<Utc>>,
    /// Resolution note
    pub resolution_note: Option<String>,
    /// Resolution reason code
    pub resolution_reason: Option<String>,
}

impl ReconciliationDiscrepancy {
    /// `actual - expected`, when both are present
    pub fn difference(&self) -> Option<Decimal> {
        match (self.expected_amount, self.actual_amount) {
            (Some(expected), Some(actual)) => Some(actual - expected),
            _ => None,
        }
    }

    /// Whether the discrepancy still needs attention
    pub fn is_open(&self) -> bool {
        self.resolution == ResolutionStatus::Open
    }
}

/// Result of `run_reconciliation`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationRun {
    /// Report
    pub report: ReconciliationReport,
    /// Discrepancies found (persisted even when the run failed)
    pub discrepancies: Vec<ReconciliationDiscrepancy>,
}

/// Filter for report listings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportFilter {
    /// Tenant scope
    pub tenant_id: Option<TenantId>,
    /// Rail
    pub rail: Option<Rail>,
    /// Reports whose period ends after this
    pub from: Option<DateTime<Utc>>,
    /// Reports whose period starts before this
    pub to: Option<DateTime<Utc>>,
    /// Maximum rows
    pub limit: Option<usize>,
}

/// Filter for discrepancy listings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscrepancyFilter {
    /// Report
    pub report_id: Option<Uuid>,
    /// Tenant
    pub tenant_id: Option<TenantId>,
    /// Rail
    pub rail: Option<Rail>,
    /// Kind
    pub kind: Option<DiscrepancyType>,
    /// Severity
    pub severity: Option<Severity>,
    /// Resolution state
    pub resolution: Option<ResolutionStatus>,
    /// Maximum rows
    pub limit: Option<usize>,
}

impl DiscrepancyFilter {
    /// Open discrepancies only
    pub fn open() -> Self {
        Self {
            resolution: Some(ResolutionStatus::Open),
            ..Default::default()
        }
    }

    /// Whether `d` passes the filter
    pub fn matches(&self, d: &ReconciliationDiscrepancy) -> bool {
        self.report_id.map_or(true, |id| d.report_id == id)
            && self
                .tenant_id
                .as_ref()
                .map_or(true, |t| d.tenant_id.as_ref() == Some(t))
            && self.rail.map_or(true, |r| d.rail == r)
            && self.kind.map_or(true, |k| d.kind == k)
            && self.severity.map_or(true, |s| d.severity == s)
            && self.resolution.map_or(true, |r| d.resolution == r)
    }
}

/// Health of a rail over a recent interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RailHealth {
    /// Rail
    pub rail: Rail,
    /// Adapter health check result
    pub adapter_healthy: bool,
    /// Adapter detail
    pub adapter_message: Option<String>,
    /// Reports in the interval
    pub reports: usize,
    /// Failed reports in the interval
    pub failed_reports: usize,
    /// Share of ledger records matched, 0..=1
    pub match_rate: Decimal,
    /// Open discrepancies on the rail
    pub open_discrepancies: usize,
    /// Open critical discrepancies on the rail
    pub open_critical: usize,
    /// Most recent completed run
    pub last_reconciled_at: Option<DateTime<Utc>>,
}

/// Per-rail totals for a tenant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RailSummary {
    /// Records
    pub count: usize,
    /// Completed records
    pub completed: usize,
    /// Failed records
    pub failed: usize,
    /// Pending or processing records
    pub in_flight: usize,
    /// Gross amount
    pub gross_amount: Decimal,
    /// Fees
    pub fee_amount: Decimal,
    /// Net amount
    pub net_amount: Decimal,
}

/// Settlement totals for a tenant over a period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementSummary {
    /// Tenant
    pub tenant_id: TenantId,
    /// Period start
    pub period_start: DateTime<Utc>,
    /// Period end
    pub period_end: DateTime<Utc>,
    /// Totals per rail
    pub by_rail: BTreeMap<Rail, RailSummary>,
    /// Totals across rails
    pub total: RailSummary,
    /// Open discrepancies for the tenant
    pub open_discrepancies: usize,
}
