//! Persistence contracts and the in-memory backend
//!
//! Every atomicity rule the engine relies on (transfer uniqueness, execution
//! leases, queue claims, the reconciliation run lock, single resolution of a
//! discrepancy) is enforced here rather than by callers.

use crate::reconciliation::{
    ConfigScope, DiscrepancyFilter, ReconciliationDiscrepancy, ReconciliationReport, ReportFilter,
    ReportStatus, ResolutionStatus, ToleranceConfig,
};
use crate::types::{Rail, SettlementRecord, SettlementStatus, TenantId};
use crate::window::{
    Holiday, QueueStats, QueueStatus, QueuedTransfer, SettlementExecution, SettlementWindowConfig,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

/// Execution batches retained per backend
pub const EXECUTION_HISTORY: usize = 1000;

/// Filter for ledger listings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    /// Tenant
    pub tenant_id: Option<TenantId>,
    /// Rail
    pub rail: Option<Rail>,
    /// Status
    pub status: Option<SettlementStatus>,
    /// Period start (inclusive), on submission or creation time
    pub from: Option<DateTime<Utc>>,
    /// Period end (exclusive)
    pub to: Option<DateTime<Utc>>,
}

impl RecordFilter {
    /// Records on `rail` placed in `[from, to)`
    pub fn period(rail: Rail, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            rail: Some(rail),
            from: Some(from),
            to: Some(to),
            ..Default::default()
        }
    }

    /// Restrict to a tenant
    pub fn for_tenant(mut self, tenant_id: Option<TenantId>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    fn matches(&self, r: &SettlementRecord) -> bool {
        let at = r.period_timestamp();
        self.tenant_id.as_ref().map_or(true, |t| &r.tenant_id == t)
            && self.rail.map_or(true, |rail| r.rail == rail)
            && self.status.map_or(true, |s| r.status == s)
            && self.from.map_or(true, |from| at >= from)
            && self.to.map_or(true, |to| at < to)
    }
}

/// Settlement ledger
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new record; `(tenant, transfer_id)` must be unique
    async fn insert_record(&self, record: SettlementRecord) -> Result<()>;

    /// Record by ID
    async fn get_record(&self, id: Uuid) -> Result<Option<SettlementRecord>>;

    /// Record by tenant and transfer
    async fn find_by_transfer(
        &self,
        tenant_id: &TenantId,
        transfer_id: Uuid,
    ) -> Result<Option<SettlementRecord>>;

    /// Replace a record, refusing status regressions and external-id rebinding
    async fn update_record(&self, record: SettlementRecord) -> Result<()>;

    /// Lower the retry ceiling to the attempts already made, leaving other fields as stored
    async fn cap_retries(&self, id: Uuid, at: DateTime<Utc>) -> Result<SettlementRecord>;

    /// Take the execution lease; `false` when another attempt holds it
    async fn try_begin_execution(&self, id: Uuid) -> Result<bool>;

    /// Release the execution lease
    async fn end_execution(&self, id: Uuid) -> Result<()>;

    /// Lease up to `limit` non-terminal records whose retry is due
    async fn claim_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SettlementRecord>>;

    /// Records passing `filter`, oldest first
    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<SettlementRecord>>;

    /// Stamp reconciliation outcome on records
    async fn mark_reconciled(&self, outcomes: &[(Uuid, bool)], at: DateTime<Utc>) -> Result<()>;
}

/// Window configs, holiday calendar, queue and execution history
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Stored config for a tenant and rail
    async fn get_window_config(
        &self,
        tenant_id: &TenantId,
        rail: Rail,
    ) -> Result<Option<SettlementWindowConfig>>;

    /// Upsert a config
    async fn save_window_config(&self, config: SettlementWindowConfig) -> Result<()>;

    /// Delete a config; `true` when one existed
    async fn delete_window_config(&self, tenant_id: &TenantId, rail: Rail) -> Result<bool>;

    /// Configs for a tenant
    async fn list_window_configs(&self, tenant_id: &TenantId) -> Result<Vec<SettlementWindowConfig>>;

    /// Upsert a holiday
    async fn save_holiday(&self, holiday: Holiday) -> Result<()>;

    /// Delete a holiday
    async fn delete_holiday(&self, id: Uuid) -> Result<Option<Holiday>>;

    /// Holidays in `[from, to]`, optionally for one country
    async fn list_holidays(
        &self,
        country: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Holiday>>;

    /// Enqueue; fails when the transfer is already active on the rail
    async fn enqueue(&self, item: QueuedTransfer) -> Result<()>;

    /// Active queue item for a transfer
    async fn find_queued(
        &self,
        tenant_id: &TenantId,
        transfer_id: Uuid,
    ) -> Result<Option<QueuedTransfer>>;

    /// Replace a queue item; settled or failed items leave the queue
    async fn update_queued(&self, item: QueuedTransfer) -> Result<()>;

    /// Remove a still-queued item; claimed items are left alone
    async fn remove_queued(&self, id: Uuid) -> Result<Option<QueuedTransfer>>;

    /// Mark up to `limit` due or urgent items processing and return them in drain order
    async fn claim_due_queued(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueuedTransfer>>;

    /// Active items, in drain order
    async fn list_queued(
        &self,
        tenant_id: Option<&TenantId>,
        rail: Option<Rail>,
    ) -> Result<Vec<QueuedTransfer>>;

    /// Depth of the waiting queue
    async fn queue_stats(&self, tenant_id: Option<&TenantId>, rail: Rail) -> Result<QueueStats>;

    /// Append an execution batch, keeping at most [`EXECUTION_HISTORY`] entries
    async fn record_execution(&self, execution: SettlementExecution) -> Result<()>;

    /// Recent executions, newest first
    async fn list_executions(
        &self,
        rail: Option<Rail>,
        limit: usize,
    ) -> Result<Vec<SettlementExecution>>;
}

/// Reports, discrepancies and tolerance configs
#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    /// Persist a running report; fails while another run holds the same key
    async fn begin_report(&self, report: ReconciliationReport) -> Result<()>;

    /// Replace a report
    async fn save_report(&self, report: ReconciliationReport) -> Result<()>;

    /// Report by ID
    async fn get_report(&self, id: Uuid) -> Result<Option<ReconciliationReport>>;

    /// Reports passing `filter`, newest first
    async fn list_reports(&self, filter: &ReportFilter) -> Result<Vec<ReconciliationReport>>;

    /// Append discrepancies
    async fn insert_discrepancies(&self, discrepancies: Vec<ReconciliationDiscrepancy>) -> Result<()>;

    /// Discrepancy by ID
    async fn get_discrepancy(&self, id: Uuid) -> Result<Option<ReconciliationDiscrepancy>>;

    /// Discrepancies passing `filter`, in detection order
    async fn list_discrepancies(
        &self,
        filter: &DiscrepancyFilter,
    ) -> Result<Vec<ReconciliationDiscrepancy>>;

    /// Close an open discrepancy; fails with `AlreadyResolved` otherwise
    async fn resolve_discrepancy(
        &self,
        id: Uuid,
        resolved_by: &str,
        note: Option<String>,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<ReconciliationDiscrepancy>;

    /// Tolerance config stored for exactly `scope`
    async fn get_tolerance(&self, scope: &ConfigScope) -> Result<Option<ToleranceConfig>>;

    /// Upsert a tolerance config
    async fn save_tolerance(&self, scope: ConfigScope, config: ToleranceConfig) -> Result<()>;

    /// Delete a tolerance config
    async fn delete_tolerance(&self, scope: &ConfigScope) -> Result<bool>;

    /// All stored tolerance configs
    async fn list_tolerances(&self) -> Result<Vec<(ConfigScope, ToleranceConfig)>>;
}

/// Process-local backend for every store trait
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: DashMap<Uuid, SettlementRecord>,
    transfers: DashMap<(TenantId, Uuid), Uuid>,
    leases: Mutex<HashSet<Uuid>>,
    window_configs: DashMap<(TenantId, Rail), SettlementWindowConfig>,
    holidays: DashMap<Uuid, Holiday>,
    queue: Mutex<Vec<QueuedTransfer>>,
    executions: Mutex<VecDeque<SettlementExecution>>,
    reports: Mutex<HashMap<Uuid, ReconciliationReport>>,
    discrepancies: Mutex<Vec<ReconciliationDiscrepancy>>,
    tolerances: DashMap<ConfigScope, ToleranceConfig>,
}

impl InMemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

fn drain_order(items: &mut [QueuedTransfer]) {
    items.sort_by(|a, b| {
        a.priority
            .rank()
            .cmp(&b.priority.rank())
            .then(a.scheduled_for.cmp(&b.scheduled_for))
            .then(a.enqueued_at.cmp(&b.enqueued_at))
    });
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn insert_record(&self, record: SettlementRecord) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        match self.transfers.entry((record.tenant_id.clone(), record.transfer_id)) {
            Entry::Occupied(existing) => Err(Error::Conflict(format!(
                "transfer {} already has settlement {}",
                record.transfer_id,
                existing.get()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record.id);
                self.records.insert(record.id, record);
                Ok(())
            }
        }
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<SettlementRecord>> {
        Ok(self.records.get(&id).map(|r| r.clone()))
    }

    async fn find_by_transfer(
        &self,
        tenant_id: &TenantId,
        transfer_id: Uuid,
    ) -> Result<Option<SettlementRecord>> {
        let id = match self.transfers.get(&(tenant_id.clone(), transfer_id)) {
            Some(id) => *id,
            None => return Ok(None),
        };
        self.get_record(id).await
    }

    async fn update_record(&self, record: SettlementRecord) -> Result<()> {
        let mut stored = self
            .records
            .get_mut(&record.id)
            .ok_or_else(|| Error::not_found("settlement", record.id))?;

        if stored.status != record.status && !stored.status.can_transition_to(record.status) {
            return Err(Error::InvalidStateTransition {
                from: stored.status.to_string(),
                to: record.status.to_string(),
            });
        }
        if let (Some(existing), Some(incoming)) =
            (&stored.external_settlement_id, &record.external_settlement_id)
        {
            if existing != incoming {
                return Err(Error::Conflict(format!(
                    "settlement {} external id is immutable",
                    record.id
                )));
            }
        }

        *stored = record;
        Ok(())
    }

    async fn cap_retries(&self, id: Uuid, at: DateTime<Utc>) -> Result<SettlementRecord> {
        let mut stored = self
            .records
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("settlement", id))?;
        if !stored.status.is_terminal() && stored.max_retries > stored.retry_count {
            stored.max_retries = stored.retry_count;
            stored.updated_at = at;
        }
        Ok(stored.clone())
    }

    async fn try_begin_execution(&self, id: Uuid) -> Result<bool> {
        Ok(self.leases.lock().insert(id))
    }

    async fn end_execution(&self, id: Uuid) -> Result<()> {
        self.leases.lock().remove(&id);
        Ok(())
    }

    async fn claim_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SettlementRecord>> {
        let mut due: Vec<SettlementRecord> = self
            .records
            .iter()
            .filter(|r| !r.status.is_terminal() && r.next_retry_at.map_or(false, |at| at <= now))
            .map(|r| r.clone())
            .collect();
        due.sort_by_key(|r| r.next_retry_at);

        let mut leases = self.leases.lock();
        Ok(due
            .into_iter()
            .filter(|r| leases.insert(r.id))
            .take(limit)
            .collect())
    }

    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<SettlementRecord>> {
        let mut records: Vec<SettlementRecord> = self
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| r.clone())
            .collect();
        records.sort_by(|a, b| {
            a.period_timestamp()
                .cmp(&b.period_timestamp())
                .then(a.id.cmp(&b.id))
        });
        Ok(records)
    }

    async fn mark_reconciled(&self, outcomes: &[(Uuid, bool)], at: DateTime<Utc>) -> Result<()> {
        for (id, matched) in outcomes {
            if let Some(mut record) = self.records.get_mut(id) {
                record.reconciled_at = Some(at);
                record.reconciliation_matched = Some(*matched);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl WindowStore for InMemoryStore {
    async fn get_window_config(
        &self,
        tenant_id: &TenantId,
        rail: Rail,
    ) -> Result<Option<SettlementWindowConfig>> {
        Ok(self
            .window_configs
            .get(&(tenant_id.clone(), rail))
            .map(|c| c.clone()))
    }

    async fn save_window_config(&self, config: SettlementWindowConfig) -> Result<()> {
        self.window_configs
            .insert((config.tenant_id.clone(), config.rail), config);
        Ok(())
    }

    async fn delete_window_config(&self, tenant_id: &TenantId, rail: Rail) -> Result<bool> {
        Ok(self.window_configs.remove(&(tenant_id.clone(), rail)).is_some())
    }

    async fn list_window_configs(&self, tenant_id: &TenantId) -> Result<Vec<SettlementWindowConfig>> {
        let mut configs: Vec<_> = self
            .window_configs
            .iter()
            .filter(|c| &c.tenant_id == tenant_id)
            .map(|c| c.clone())
            .collect();
        configs.sort_by_key(|c| c.rail);
        Ok(configs)
    }

    async fn save_holiday(&self, holiday: Holiday) -> Result<()> {
        self.holidays.insert(holiday.id, holiday);
        Ok(())
    }

    async fn delete_holiday(&self, id: Uuid) -> Result<Option<Holiday>> {
        Ok(self.holidays.remove(&id).map(|(_, h)| h))
    }

    async fn list_holidays(
        &self,
        country: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Holiday>> {
        let mut holidays: Vec<_> = self
            .holidays
            .iter()
            .filter(|h| country.map_or(true, |c| h.country.eq_ignore_ascii_case(c)))
            .filter(|h| h.date >= from && h.date <= to)
            .map(|h| h.clone())
            .collect();
        holidays.sort_by(|a, b| a.date.cmp(&b.date).then(a.country.cmp(&b.country)));
        Ok(holidays)
    }

    async fn enqueue(&self, item: QueuedTransfer) -> Result<()> {
        let mut queue = self.queue.lock();
        if queue.iter().any(|q| {
            q.status.is_active() && q.transfer_id == item.transfer_id && q.rail == item.rail
        }) {
            return Err(Error::AlreadyQueued {
                transfer_id: item.transfer_id,
                rail: item.rail.to_string(),
            });
        }
        queue.push(item);
        Ok(())
    }

    async fn find_queued(
        &self,
        tenant_id: &TenantId,
        transfer_id: Uuid,
    ) -> Result<Option<QueuedTransfer>> {
        Ok(self
            .queue
            .lock()
            .iter()
            .find(|q| q.status.is_active() && &q.tenant_id == tenant_id && q.transfer_id == transfer_id)
            .cloned())
    }

    async fn update_queued(&self, item: QueuedTransfer) -> Result<()> {
        let mut queue = self.queue.lock();
        let idx = queue
            .iter()
            .position(|q| q.id == item.id)
            .ok_or_else(|| Error::not_found("queued transfer", item.id))?;
        if item.status.is_active() {
            queue[idx] = item;
        } else {
            queue.swap_remove(idx);
        }
        Ok(())
    }

    async fn remove_queued(&self, id: Uuid) -> Result<Option<QueuedTransfer>> {
        let mut queue = self.queue.lock();
        match queue
            .iter()
            .position(|q| q.id == id && q.status == QueueStatus::Queued)
        {
            Some(idx) => Ok(Some(queue.remove(idx))),
            None => Ok(None),
        }
    }

    async fn claim_due_queued(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueuedTransfer>> {
        let mut queue = self.queue.lock();
        let mut due: Vec<QueuedTransfer> = queue
            .iter()
            .filter(|q| {
                q.status == QueueStatus::Queued
                    && (q.scheduled_for <= now || q.priority == crate::window::QueuePriority::Urgent)
            })
            .cloned()
            .collect();
        drain_order(&mut due);
        due.truncate(limit);

        let claimed: HashSet<Uuid> = due.iter().map(|q| q.id).collect();
        for q in queue.iter_mut().filter(|q| claimed.contains(&q.id)) {
            q.status = QueueStatus::Processing;
            q.updated_at = now;
        }
        for q in due.iter_mut() {
            q.status = QueueStatus::Processing;
            q.updated_at = now;
        }
        Ok(due)
    }

    async fn list_queued(
        &self,
        tenant_id: Option<&TenantId>,
        rail: Option<Rail>,
    ) -> Result<Vec<QueuedTransfer>> {
        let mut items: Vec<_> = self
            .queue
            .lock()
            .iter()
            .filter(|q| q.status.is_active())
            .filter(|q| tenant_id.map_or(true, |t| &q.tenant_id == t))
            .filter(|q| rail.map_or(true, |r| q.rail == r))
            .cloned()
            .collect();
        drain_order(&mut items);
        Ok(items)
    }

    async fn queue_stats(&self, tenant_id: Option<&TenantId>, rail: Rail) -> Result<QueueStats> {
        let queue = self.queue.lock();
        let waiting = queue.iter().filter(|q| {
            q.status == QueueStatus::Queued
                && q.rail == rail
                && tenant_id.map_or(true, |t| &q.tenant_id == t)
        });
        let mut stats = QueueStats::default();
        for q in waiting {
            stats.depth += 1;
            stats.amount += q.amount;
        }
        Ok(stats)
    }

    async fn record_execution(&self, execution: SettlementExecution) -> Result<()> {
        let mut executions = self.executions.lock();
        if executions.len() >= EXECUTION_HISTORY {
            executions.pop_front();
        }
        executions.push_back(execution);
        Ok(())
    }

    async fn list_executions(
        &self,
        rail: Option<Rail>,
        limit: usize,
    ) -> Result<Vec<SettlementExecution>> {
        Ok(self
            .executions
            .lock()
            .iter()
            .rev()
            .filter(|e| rail.map_or(true, |r| e.rail == r))
            .take(limit)
            .cloned()
            .collect())
    }
}

fn same_run(a: &ReconciliationReport, b: &ReconciliationReport) -> bool {
    a.tenant_id == b.tenant_id
        && a.rail == b.rail
        && a.period_start == b.period_start
        && a.period_end == b.period_end
}

#[async_trait]
impl ReconciliationStore for InMemoryStore {
    async fn begin_report(&self, report: ReconciliationReport) -> Result<()> {
        let mut reports = self.reports.lock();
        if reports
            .values()
            .any(|r| r.status == ReportStatus::Running && same_run(r, &report))
        {
            return Err(Error::ReconciliationInProgress {
                rail: report.rail.to_string(),
                period: format!("{} .. {}", report.period_start, report.period_end),
            });
        }
        reports.insert(report.id, report);
        Ok(())
    }

    async fn save_report(&self, report: ReconciliationReport) -> Result<()> {
        self.reports.lock().insert(report.id, report);
        Ok(())
    }

    async fn get_report(&self, id: Uuid) -> Result<Option<ReconciliationReport>> {
        Ok(self.reports.lock().get(&id).cloned())
    }

    async fn list_reports(&self, filter: &ReportFilter) -> Result<Vec<ReconciliationReport>> {
        let mut reports: Vec<_> = self
            .reports
            .lock()
            .values()
            .filter(|r| {
                filter
                    .tenant_id
                    .as_ref()
                    .map_or(true, |t| r.tenant_id.as_ref() == Some(t))
                    && filter.rail.map_or(true, |rail| r.rail == rail)
                    && filter.from.map_or(true, |from| r.period_end > from)
                    && filter.to.map_or(true, |to| r.period_start < to)
            })
            .cloned()
            .collect();
        reports.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            reports.truncate(limit);
        }
        Ok(reports)
    }

    async fn insert_discrepancies(&self, discrepancies: Vec<ReconciliationDiscrepancy>) -> Result<()> {
        self.discrepancies.lock().extend(discrepancies);
        Ok(())
    }

    async fn get_discrepancy(&self, id: Uuid) -> Result<Option<ReconciliationDiscrepancy>> {
        Ok(self.discrepancies.lock().iter().find(|d| d.id == id).cloned())
    }

    async fn list_discrepancies(
        &self,
        filter: &DiscrepancyFilter,
    ) -> Result<Vec<ReconciliationDiscrepancy>> {
        let discrepancies = self.discrepancies.lock();
        let matching = discrepancies.iter().filter(|d| filter.matches(d)).cloned();
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn resolve_discrepancy(
        &self,
        id: Uuid,
        resolved_by: &str,
        note: Option<String>,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<ReconciliationDiscrepancy> {
        let mut discrepancies = self.discrepancies.lock();
        let d = discrepancies
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| Error::not_found("discrepancy", id))?;
        if d.resolution == ResolutionStatus::Resolved {
            return Err(Error::AlreadyResolved(id));
        }
        d.resolution = ResolutionStatus::Resolved;
        d.resolved_by = Some(resolved_by.to_string());
        d.resolved_at = Some(at);
        d.resolution_note = note;
        d.resolution_reason = reason;
        Ok(d.clone())
    }

    async fn get_tolerance(&self, scope: &ConfigScope) -> Result<Option<ToleranceConfig>> {
        Ok(self.tolerances.get(scope).map(|c| c.clone()))
    }

    async fn save_tolerance(&self, scope: ConfigScope, config: ToleranceConfig) -> Result<()> {
        self.tolerances.insert(scope, config);
        Ok(())
    }

    async fn delete_tolerance(&self, scope: &ConfigScope) -> Result<bool> {
        Ok(self.tolerances.remove(scope).is_some())
    }

    async fn list_tolerances(&self) -> Result<Vec<(ConfigScope, ToleranceConfig)>> {
        let mut configs: Vec<_> = self
            .tolerances
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        configs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(configs)
    }
}
