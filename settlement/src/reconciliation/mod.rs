//! Reconciliation engine
//!
//! Audits a time-boxed slice of the ledger against the rail's own feed and
//! persists a report plus the discrepancies found.
//!
//! # Design
//!
//! - A `running` report per `(tenant, rail, period)` acts as an advisory lock
//! - A run never stays `running`: any error finalizes it as `failed`, after
//!   persisting whatever discrepancies were already computed
//! - Discrepancies are surfaced, never corrected; the only automatic
//!   resolution is the opt-in amount-capped auto-resolve

pub mod config;
pub mod matcher;
pub mod report;

pub use config::{ConfigScope, ToleranceConfig};
pub use matcher::{amount_severity, match_transactions, status_severity, MatchContext, MatchOutcome};
pub use report::{
    DiscrepancyFilter, DiscrepancyType, RailHealth, RailSummary, ReconciliationDiscrepancy,
    ReconciliationReport, ReconciliationRun, ReportFilter, ReportStatus, ResolutionStatus,
    SettlementSummary, Severity,
};

use crate::adapters::{AdapterError, AdapterRegistry, ExternalTransaction};
use crate::events::{EventSink, SettlementEvent};
use crate::metrics::{DISCREPANCIES_TOTAL, RECONCILIATION_RUNS};
use crate::store::{RecordFilter, RecordStore, ReconciliationStore};
use crate::types::{Operator, Rail, SettlementStatus, TenantId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Identity recorded on auto-resolved discrepancies
pub const AUTO_RESOLVER: &str = "system:auto-resolve";

#[derive(Default)]
struct RunState {
    discrepancies: Vec<ReconciliationDiscrepancy>,
    persisted: bool,
}

/// Reconciliation engine
pub struct ReconciliationEngine {
    records: Arc<dyn RecordStore>,
    store: Arc<dyn ReconciliationStore>,
    adapters: AdapterRegistry,
    events: Arc<dyn EventSink>,
    defaults: ToleranceConfig,
    adapter_timeout: Duration,
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("adapters", &self.adapters)
            .field("defaults", &self.defaults)
            .field("adapter_timeout", &self.adapter_timeout)
            .finish()
    }
}

impl ReconciliationEngine {
    /// Create new engine; `defaults` is the last tolerance fallback
    pub fn new(
        records: Arc<dyn RecordStore>,
        store: Arc<dyn ReconciliationStore>,
        adapters: AdapterRegistry,
        events: Arc<dyn EventSink>,
        defaults: ToleranceConfig,
        adapter_timeout: Duration,
    ) -> Self {
        Self {
            records,
            store,
            adapters,
            events,
            defaults,
            adapter_timeout,
        }
    }

    /// Reconcile one rail over `[period_start, period_end)`
    ///
    /// Returns `Ok` with a `failed` report when the run itself broke; errors
    /// are reserved for refusing to start (bad period, run already active).
    pub async fn run_reconciliation(
        &self,
        tenant_id: Option<&TenantId>,
        rail: Rail,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<ReconciliationRun> {
        if period_start >= period_end {
            return Err(Error::InvalidPeriod(format!(
                "{} is not before {}",
                period_start, period_end
            )));
        }

        let mut report = ReconciliationReport::start(tenant_id.cloned(), rail, period_start, period_end);
        self.store.begin_report(report.clone()).await?;

        info!(
            report_id = %report.id,
            tenant = ?tenant_id,
            rail = %rail,
            period_start = %period_start,
            period_end = %period_end,
            "Reconciliation started"
        );

        let mut state = RunState::default();
        let outcome = self.reconcile(&mut report, &mut state).await;

        let (status, error_message) = match outcome {
            Ok(()) => (ReportStatus::Completed, None),
            Err(e) => {
                error!(report_id = %report.id, rail = %rail, "Reconciliation failed: {}", e);
                if !state.persisted && !state.discrepancies.is_empty() {
                    if let Err(persist) = self
                        .store
                        .insert_discrepancies(state.discrepancies.clone())
                        .await
                    {
                        error!(report_id = %report.id, "Failed to persist partial discrepancies: {}", persist);
                    }
                }
                (ReportStatus::Failed, Some(e.to_string()))
            }
        };

        report.tally(&state.discrepancies);
        report.finish(status, error_message);
        self.store.save_report(report.clone()).await?;

        let status_label = match report.status {
            ReportStatus::Completed => "completed",
            ReportStatus::Failed => "failed",
            ReportStatus::Running => "running",
        };
        RECONCILIATION_RUNS
            .with_label_values(&[rail.as_str(), status_label])
            .inc();

        for d in &state.discrepancies {
            DISCREPANCIES_TOTAL
                .with_label_values(&[rail.as_str(), d.kind.as_str(), d.severity.as_str()])
                .inc();
            self.publish(SettlementEvent::discrepancy(d)).await;
        }
        self.publish(SettlementEvent::reconciliation_completed(&report))
            .await;

        info!(
            report_id = %report.id,
            rail = %rail,
            status = status_label,
            total = report.total_transactions,
            matched = report.matched_count,
            discrepancies = report.discrepancy_count,
            difference = %report.difference,
            duration_ms = report.duration_ms.unwrap_or(0),
            "Reconciliation finished"
        );

        Ok(ReconciliationRun {
            report,
            discrepancies: state.discrepancies,
        })
    }

    async fn reconcile(&self, report: &mut ReconciliationReport, state: &mut RunState) -> Result<()> {
        let tolerance = self.resolve_tolerance(report.tenant_id.as_ref(), report.rail).await?;
        let window = tolerance.timing_tolerance();

        let (from, to) = (report.period_start - window, report.period_end + window);
        let records = self
            .records
            .list_records(
                &RecordFilter::period(report.rail, from, to).for_tenant(report.tenant_id.clone()),
            )
            .await?;

        let mut external = self.fetch_external(report.rail, from, to).await?;

        if report.tenant_id.is_some() {
            // the feed is rail-wide; drop what the ledger attributes to other tenants
            let everyone = self
                .records
                .list_records(&RecordFilter::period(report.rail, from, to))
                .await?;
            let (mut foreign_ids, mut foreign_transfers) = (HashSet::new(), HashSet::new());
            for r in everyone.iter().filter(|r| Some(&r.tenant_id) != report.tenant_id.as_ref()) {
                foreign_transfers.insert(r.transfer_id);
                if let Some(id) = &r.external_settlement_id {
                    foreign_ids.insert(id.clone());
                }
            }
            external.retain(|tx| {
                !foreign_ids.contains(&tx.external_id)
                    && !tx.transfer_id.map_or(false, |t| foreign_transfers.contains(&t))
            });
        }

        let ctx = MatchContext {
            report_id: report.id,
            tenant_id: report.tenant_id.clone(),
            rail: report.rail,
            period_start: report.period_start,
            period_end: report.period_end,
            detected_at: Utc::now(),
        };
        let outcome = match_transactions(&ctx, &records, &external, &tolerance);

        report.total_transactions = outcome.ledger_count;
        report.external_transactions = outcome.external_count;
        report.matched_count = outcome.matched_count;
        report.expected_total = outcome.expected_total;
        report.actual_total = outcome.actual_total;
        report.difference = (outcome.expected_total - outcome.actual_total).abs();
        state.discrepancies = outcome.discrepancies;

        self.store
            .insert_discrepancies(state.discrepancies.clone())
            .await?;
        state.persisted = true;

        if tolerance.auto_resolve_enabled {
            self.auto_resolve(&tolerance, &mut state.discrepancies).await?;
        }

        self.records
            .mark_reconciled(&outcome.reconciled, Utc::now())
            .await?;
        Ok(())
    }

    async fn fetch_external(
        &self,
        rail: Rail,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExternalTransaction>> {
        let query = self.adapters.query(rail)?;
        match tokio::time::timeout(self.adapter_timeout, query.list_transactions(from, to)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(AdapterError::Timeout {
                seconds: self.adapter_timeout.as_secs(),
            }
            .into()),
        }
    }

    async fn auto_resolve(
        &self,
        tolerance: &ToleranceConfig,
        discrepancies: &mut [ReconciliationDiscrepancy],
    ) -> Result<()> {
        for d in discrepancies
            .iter_mut()
            .filter(|d| d.kind == DiscrepancyType::AmountMismatch)
        {
            let difference = match d.difference() {
                Some(diff) if tolerance.auto_resolves(diff) => diff,
                _ => continue,
            };
            *d = self
                .store
                .resolve_discrepancy(
                    d.id,
                    AUTO_RESOLVER,
                    Some(format!(
                        "difference {} within auto-resolve ceiling {}",
                        difference, tolerance.auto_resolve_max_amount
                    )),
                    Some("auto_resolve".to_string()),
                    Utc::now(),
                )
                .await?;
            info!(discrepancy_id = %d.id, %difference, "Discrepancy auto-resolved");
        }
        Ok(())
    }

    /// Report by ID
    pub async fn get_report(&self, id: Uuid) -> Result<ReconciliationReport> {
        self.store
            .get_report(id)
            .await?
            .ok_or_else(|| Error::not_found("reconciliation report", id))
    }

    /// Reports, newest first
    pub async fn get_reports(&self, filter: &ReportFilter) -> Result<Vec<ReconciliationReport>> {
        self.store.list_reports(filter).await
    }

    /// Discrepancies matching a filter
    pub async fn get_discrepancies(
        &self,
        filter: &DiscrepancyFilter,
    ) -> Result<Vec<ReconciliationDiscrepancy>> {
        self.store.list_discrepancies(filter).await
    }

    /// Resolve a discrepancy; fails if it is already resolved
    pub async fn resolve_discrepancy(
        &self,
        id: Uuid,
        operator: &Operator,
        note: Option<String>,
        reason: Option<String>,
    ) -> Result<ReconciliationDiscrepancy> {
        operator.require_operator("discrepancy resolution")?;
        let resolved = self
            .store
            .resolve_discrepancy(id, &operator.id, note, reason, Utc::now())
            .await?;
        info!(
            discrepancy_id = %id,
            operator = %operator.id,
            kind = %resolved.kind,
            "Discrepancy resolved"
        );
        Ok(resolved)
    }

    /// Adapter health plus reconciliation state since `since`
    pub async fn get_rail_health(&self, rail: Rail, since: DateTime<Utc>) -> Result<RailHealth> {
        let (adapter_healthy, adapter_message) = match self.adapters.query(rail) {
            Ok(query) => match tokio::time::timeout(self.adapter_timeout, query.health_check()).await {
                Ok(Ok(status)) => (status.healthy, status.message),
                Ok(Err(e)) => (false, Some(e.to_string())),
                Err(_) => (false, Some("health check timed out".to_string())),
            },
            Err(e) => (false, Some(e.to_string())),
        };

        let reports = self
            .store
            .list_reports(&ReportFilter {
                rail: Some(rail),
                from: Some(since),
                ..Default::default()
            })
            .await?;

        let completed: Vec<_> = reports
            .iter()
            .filter(|r| r.status == ReportStatus::Completed)
            .collect();
        let total: usize = completed.iter().map(|r| r.total_transactions).sum();
        let matched: usize = completed.iter().map(|r| r.matched_count).sum();
        let match_rate = if total == 0 {
            Decimal::ONE
        } else {
            Decimal::from(matched as u64) / Decimal::from(total as u64)
        };

        let open = self
            .store
            .list_discrepancies(&DiscrepancyFilter {
                rail: Some(rail),
                ..DiscrepancyFilter::open()
            })
            .await?;

        Ok(RailHealth {
            rail,
            adapter_healthy,
            adapter_message,
            reports: reports.len(),
            failed_reports: reports
                .iter()
                .filter(|r| r.status == ReportStatus::Failed)
                .count(),
            match_rate,
            open_discrepancies: open.len(),
            open_critical: open
                .iter()
                .filter(|d| d.severity == Severity::Critical)
                .count(),
            last_reconciled_at: completed.iter().filter_map(|r| r.completed_at).max(),
        })
    }

    /// Per-rail settlement totals for a tenant
    pub async fn get_settlement_summary(
        &self,
        tenant_id: &TenantId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<SettlementSummary> {
        if from >= to {
            return Err(Error::InvalidPeriod(format!("{} is not before {}", from, to)));
        }
        let records = self
            .records
            .list_records(&RecordFilter {
                tenant_id: Some(tenant_id.clone()),
                from: Some(from),
                to: Some(to),
                ..Default::default()
            })
            .await?;

        let mut by_rail: BTreeMap<Rail, RailSummary> = BTreeMap::new();
        let mut total = RailSummary::default();
        for r in &records {
            for summary in [by_rail.entry(r.rail).or_default(), &mut total] {
                summary.count += 1;
                match r.status {
                    SettlementStatus::Completed => summary.completed += 1,
                    SettlementStatus::Failed => summary.failed += 1,
                    SettlementStatus::Pending | SettlementStatus::Processing => {
                        summary.in_flight += 1
                    }
                }
                summary.gross_amount += r.gross_amount;
                summary.fee_amount += r.fee_amount;
                summary.net_amount += r.net_amount;
            }
        }

        let open_discrepancies = self
            .store
            .list_discrepancies(&DiscrepancyFilter {
                tenant_id: Some(tenant_id.clone()),
                ..DiscrepancyFilter::open()
            })
            .await?
            .len();

        Ok(SettlementSummary {
            tenant_id: tenant_id.clone(),
            period_start: from,
            period_end: to,
            by_rail,
            total,
            open_discrepancies,
        })
    }

    /// Effective tolerance: tenant+rail, tenant, global, then built-in
    pub async fn resolve_tolerance(
        &self,
        tenant_id: Option<&TenantId>,
        rail: Rail,
    ) -> Result<ToleranceConfig> {
        for scope in ConfigScope::lookup_chain(tenant_id, rail) {
            if let Some(config) = self.store.get_tolerance(&scope).await? {
                return Ok(config);
            }
        }
        Ok(self.defaults.clone())
    }

    /// Stored tolerance for one scope
    pub async fn get_tolerance(&self, scope: &ConfigScope) -> Result<Option<ToleranceConfig>> {
        self.store.get_tolerance(scope).await
    }

    /// Create or replace the tolerance for a scope
    pub async fn save_tolerance(&self, scope: ConfigScope, config: ToleranceConfig) -> Result<()> {
        if config.amount_tolerance_fixed < Decimal::ZERO
            || config.amount_tolerance_percent < Decimal::ZERO
            || config.auto_resolve_max_amount < Decimal::ZERO
        {
            return Err(Error::Config("tolerances must not be negative".to_string()));
        }
        info!(scope = ?scope, "Tolerance config saved");
        self.store.save_tolerance(scope, config).await
    }

    /// Delete the tolerance for a scope
    pub async fn delete_tolerance(&self, scope: &ConfigScope) -> Result<bool> {
        self.store.delete_tolerance(scope).await
    }

    /// Every stored tolerance
    pub async fn list_tolerances(&self) -> Result<Vec<(ConfigScope, ToleranceConfig)>> {
        self.store.list_tolerances().await
    }

    async fn publish(&self, event: SettlementEvent) {
        let name = event.name();
        if let Err(e) = self.events.publish(event).await {
            warn!(event = name, "Event publish failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockRail;
    use crate::events::TracingEventSink;
    use crate::store::InMemoryStore;
    use crate::types::{Protocol, SettlementRecord, SettlementRequest};
    use chrono::{Duration as ChronoDuration, TimeZone};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn engine() -> (ReconciliationEngine, Arc<InMemoryStore>, HashMap<Rail, Arc<MockRail>>) {
        let (registry, mocks) = AdapterRegistry::with_mocks();
        let store = Arc::new(InMemoryStore::new());
        let engine = ReconciliationEngine::new(
            store.clone(),
            store.clone(),
            registry,
            Arc::new(TracingEventSink),
            ToleranceConfig::default(),
            Duration::from_secs(5),
        );
        (engine, store, mocks)
    }

    fn submitted_record(tenant: &str, net: Decimal, external_id: &str, at: DateTime<Utc>) -> SettlementRecord {
        let request = SettlementRequest::new(TenantId::new(tenant), Protocol::CrossBorder, net, "BRL");
        SettlementRecord {
            id: Uuid::new_v4(),
            transfer_id: request.transfer_id,
            tenant_id: request.tenant_id.clone(),
            rail: Rail::Pix,
            protocol: Protocol::CrossBorder,
            status: SettlementStatus::Completed,
            gross_amount: net,
            fee_amount: Decimal::ZERO,
            net_amount: net,
            currency: "BRL".to_string(),
            external_settlement_id: Some(external_id.to_string()),
            submitted_at: Some(at),
            settled_at: Some(at),
            estimated_completion: None,
            retry_count: 0,
            max_retries: 3,
            next_retry_at: None,
            last_error: None,
            routing: None,
            request,
            reconciled_at: None,
            reconciliation_matched: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn test_adjacent_periods_share_boundary_traffic() {
        let (engine, store, mocks) = engine();
        let ten = Utc.with_ymd_and_hms(2026, 3, 10, 10, 0, 0).unwrap();
        let eleven = ten + ChronoDuration::hours(1);
        let twelve = eleven + ChronoDuration::hours(1);

        let record = submitted_record("acme", dec!(100), "PIX-1", eleven - ChronoDuration::seconds(1));
        store.insert_record(record.clone()).await.unwrap();
        mocks[&Rail::Pix]
            .insert_transaction(ExternalTransaction {
                external_id: "PIX-1".to_string(),
                transfer_id: Some(record.transfer_id),
                amount: dec!(100),
                status: SettlementStatus::Completed,
                submitted_at: eleven + ChronoDuration::seconds(1),
                completed_at: Some(eleven + ChronoDuration::seconds(1)),
                raw: serde_json::Value::Null,
            })
            .await;

        let first = engine.run_reconciliation(None, Rail::Pix, ten, eleven).await.unwrap();
        assert!(first.discrepancies.is_empty());
        assert_eq!(first.report.matched_count, 1);

        let second = engine.run_reconciliation(None, Rail::Pix, eleven, twelve).await.unwrap();
        assert_eq!(second.report.status, ReportStatus::Completed);
        assert!(second.discrepancies.is_empty());
        assert_eq!(second.report.total_transactions, 0);
        assert_eq!(second.report.actual_total, Decimal::ZERO);

        let tenant_run = engine
            .run_reconciliation(Some(&TenantId::new("acme")), Rail::Pix, eleven, twelve)
            .await
            .unwrap();
        assert!(tenant_run.discrepancies.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_inverted_period() {
        let (engine, _, _) = engine();
        let now = Utc::now();
        let result = engine.run_reconciliation(None, Rail::Pix, now, now).await;
        assert!(matches!(result, Err(Error::InvalidPeriod(_))));
    }

    #[tokio::test]
    async fn test_adapter_failure_marks_report_failed() {
        let (engine, _, mocks) = engine();
        mocks[&Rail::Pix]
            .fail_listing(Some(AdapterError::Connection("refused".into())))
            .await;
        let now = Utc::now();
        let run = engine
            .run_reconciliation(None, Rail::Pix, now - ChronoDuration::hours(1), now)
            .await
            .unwrap();

        assert_eq!(run.report.status, ReportStatus::Failed);
        assert!(run.report.error_message.unwrap().contains("refused"));
        let stored = engine.get_report(run.report.id).await.unwrap();
        assert_eq!(stored.status, ReportStatus::Failed);
    }

    #[tokio::test]
    async fn test_tolerance_layers() {
        let (engine, _, _) = engine();
        let tenant = TenantId::new("acme");

        let base = engine.resolve_tolerance(Some(&tenant), Rail::Ach).await.unwrap();
        assert_eq!(base, ToleranceConfig::default());

        let global = ToleranceConfig {
            amount_tolerance_fixed: dec!(1),
            ..Default::default()
        };
        let scoped = ToleranceConfig {
            amount_tolerance_fixed: dec!(5),
            ..Default::default()
        };
        engine.save_tolerance(ConfigScope::Global, global.clone()).await.unwrap();
        engine
            .save_tolerance(
                ConfigScope::TenantRail {
                    tenant_id: tenant.clone(),
                    rail: Rail::Ach,
                },
                scoped.clone(),
            )
            .await
            .unwrap();

        assert_eq!(engine.resolve_tolerance(Some(&tenant), Rail::Ach).await.unwrap(), scoped);
        assert_eq!(engine.resolve_tolerance(Some(&tenant), Rail::Wire).await.unwrap(), global);
        assert_eq!(engine.resolve_tolerance(None, Rail::Ach).await.unwrap(), global);
        assert_eq!(engine.list_tolerances().await.unwrap().len(), 2);

        let negative = ToleranceConfig {
            amount_tolerance_fixed: dec!(-1),
            ..Default::default()
        };
        assert!(engine.save_tolerance(ConfigScope::Global, negative).await.is_err());
    }

    #[tokio::test]
    async fn test_rail_health_reports_adapter_state() {
        let (engine, _, mocks) = engine();
        mocks[&Rail::Sepa]
            .set_health(false, Some("maintenance".to_string()))
            .await;
        let health = engine
            .get_rail_health(Rail::Sepa, Utc::now() - ChronoDuration::days(1))
            .await
            .unwrap();
        assert!(!health.adapter_healthy);
        assert_eq!(health.adapter_message.as_deref(), Some("maintenance"));
        assert_eq!(health.match_rate, Decimal::ONE);
        assert_eq!(health.reports, 0);
    }
}
