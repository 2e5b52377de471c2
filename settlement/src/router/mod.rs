//! Settlement routing and execution
//!
//! Selects a rail for each transfer, computes fees, and drives execution
//! either directly or through the window queue.
//!
//! # Design
//!
//! - Rail selection: protocol preference first, then lowest numeric priority
//! - One `pending` record is created per `(tenant, transfer_id)` as soon as
//!   routing completes
//! - An execution lease in the record store keeps at most one attempt in
//!   flight per settlement
//! - Transient failures book `next_retry_at`; a sweep re-executes them

pub mod fees;
pub mod retry;

pub use fees::{calculate_fee, FeeBreakdown, FEE_SCALE};
pub use retry::{failure_from_adapter, RetryDecision, RetryPolicy};

use crate::adapters::{AdapterError, AdapterRegistry, RailExecutionRequest, RailExecutionResult};
use crate::catalog::RailCatalog;
use crate::config::RouterConfig;
use crate::events::{EventSink, SettlementEvent, SettlementEventPayload};
use crate::metrics::{RETRIES_SCHEDULED, ROUTING_DURATION, SETTLEMENTS_TOTAL};
use crate::store::RecordStore;
use crate::types::{
    Rail, RoutingDecision, SettlementFailure, SettlementRecord, SettlementRequest,
    SettlementResponse, SettlementStatus, TenantId,
};
use crate::window::{
    QueuePriority, QueuedTransfer, SettlementExecution, SettlementWindowManager,
};
use crate::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashSet;
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A request that could not be routed or settled in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// Transfer ID
    pub transfer_id: Uuid,
    /// Error code
    pub code: String,
    /// Error message
    pub message: String,
}

impl BatchFailure {
    fn new(transfer_id: Uuid, err: &Error) -> Self {
        Self {
            transfer_id,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Routing decisions grouped by selected rail
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchRouting {
    /// Decisions per rail
    pub by_rail: BTreeMap<Rail, Vec<RoutingDecision>>,
    /// Requests that could not be routed
    pub failures: Vec<BatchFailure>,
}

/// Settlement responses grouped by rail
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSettlement {
    /// Responses per rail
    pub by_rail: BTreeMap<Rail, Vec<SettlementResponse>>,
    /// Requests that could not be settled
    pub failures: Vec<BatchFailure>,
}

/// Outcome of a retry sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySweep {
    /// Retries claimed
    pub claimed: usize,
    /// Completed on this attempt
    pub completed: usize,
    /// Still processing (asynchronous rail or rescheduled)
    pub processing: usize,
    /// Terminally failed
    pub failed: usize,
}

/// Outcome of a queue drain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueDrain {
    /// Items claimed
    pub claimed: usize,
    /// Items handed to the rail
    pub submitted: usize,
    /// Items that failed
    pub failed: usize,
    /// Items put back because their window had closed again
    pub rescheduled: usize,
    /// Batch logs written, one per rail
    pub executions: Vec<SettlementExecution>,
}

/// Settlement router
pub struct SettlementRouter {
    catalog: Arc<RailCatalog>,
    adapters: AdapterRegistry,
    records: Arc<dyn RecordStore>,
    windows: Option<Arc<SettlementWindowManager>>,
    events: Arc<dyn EventSink>,
    retry: RetryPolicy,
    config: RouterConfig,
    unavailable: DashSet<Rail>,
}

impl std::fmt::Debug for SettlementRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementRouter")
            .field("adapters", &self.adapters)
            .field("windows", &self.windows.is_some())
            .field("config", &self.config)
            .field("unavailable", &self.unavailable)
            .finish()
    }
}

impl SettlementRouter {
    /// Create new router
    pub fn new(
        catalog: Arc<RailCatalog>,
        adapters: AdapterRegistry,
        records: Arc<dyn RecordStore>,
        events: Arc<dyn EventSink>,
        config: RouterConfig,
    ) -> Self {
        Self {
            catalog,
            adapters,
            records,
            windows: None,
            events,
            retry: RetryPolicy::from_config(&config),
            config,
            unavailable: DashSet::new(),
        }
    }

    /// Gate execution on settlement windows
    pub fn with_windows(mut self, windows: Arc<SettlementWindowManager>) -> Self {
        self.windows = Some(windows);
        self
    }

    /// Take a rail out of routing
    pub fn mark_rail_unavailable(&self, rail: Rail) {
        if self.unavailable.insert(rail) {
            warn!(rail = %rail, "Rail marked unavailable");
        }
    }

    /// Return a rail to routing
    pub fn mark_rail_available(&self, rail: Rail) {
        if self.unavailable.remove(&rail).is_some() {
            info!(rail = %rail, "Rail marked available");
        }
    }

    /// Catalog-supported, executor registered, not marked down
    pub fn is_rail_available(&self, rail: Rail) -> bool {
        self.catalog.descriptor(rail).map_or(false, |d| d.supported)
            && self.adapters.has_executor(rail)
            && !self.unavailable.contains(&rail)
    }

    fn destination_country(&self, request: &SettlementRequest) -> String {
        match &request.destination_country {
            Some(country) if !country.trim().is_empty() => country.trim().to_uppercase(),
            _ => {
                let currency = request
                    .destination_currency
                    .as_deref()
                    .unwrap_or(&request.source_currency);
                self.catalog.country_for_currency(currency).to_string()
            }
        }
    }

    /// Select a rail for a request
    pub fn route(&self, request: &SettlementRequest) -> Result<RoutingDecision> {
        let started = Instant::now();
        request.validate()?;

        let country = self.destination_country(request);
        let candidates: Vec<_> = self
            .catalog
            .rails_for_country(&country)
            .iter()
            .filter_map(|rail| self.catalog.descriptor(*rail))
            .filter(|d| d.admits(request.amount) && self.is_rail_available(d.rail))
            .collect();

        if candidates.is_empty() {
            warn!(
                transfer_id = %request.transfer_id,
                country = %country,
                amount = %request.amount,
                "No rails available"
            );
            return Err(Error::NoRailsAvailable {
                country,
                amount: request.amount,
            });
        }

        let preferences = self.catalog.preferences(request.protocol);
        let preference_rank = |rail: Rail| {
            preferences
                .iter()
                .position(|p| *p == rail)
                .unwrap_or(usize::MAX)
        };

        let preferred = preferences
            .iter()
            .find_map(|p| candidates.iter().find(|d| d.rail == *p));
        let (selected, rationale) = match preferred {
            Some(d) => (
                *d,
                format!(
                    "{} prefers {} (preference {} of {})",
                    request.protocol,
                    d.rail,
                    preference_rank(d.rail) + 1,
                    preferences.len()
                ),
            ),
            None => {
                // candidates is non-empty
                let d = candidates
                    .iter()
                    .min_by_key(|d| (d.priority, d.rail))
                    .copied()
                    .ok_or_else(|| Error::NoRailsAvailable {
                        country: country.clone(),
                        amount: request.amount,
                    })?;
                (
                    d,
                    format!(
                        "no preferred rail for {}; lowest priority {} among {} candidates",
                        request.protocol,
                        d.priority,
                        candidates.len()
                    ),
                )
            }
        };

        let mut alternatives: Vec<_> = candidates
            .iter()
            .filter(|d| d.rail != selected.rail)
            .map(|d| (preference_rank(d.rail), d.priority, d.rail))
            .collect();
        alternatives.sort();

        let elapsed = started.elapsed();
        ROUTING_DURATION
            .with_label_values(&[request.protocol.as_str()])
            .observe(elapsed.as_secs_f64());

        debug!(
            transfer_id = %request.transfer_id,
            rail = %selected.rail,
            country = %country,
            rationale = %rationale,
            "Routed transfer"
        );

        Ok(RoutingDecision {
            transfer_id: request.transfer_id,
            protocol: request.protocol,
            selected_rail: selected.rail,
            rail: selected.clone(),
            alternatives: alternatives.into_iter().map(|(_, _, rail)| rail).collect(),
            destination_country: country,
            latency_micros: elapsed.as_micros() as u64,
            rationale,
            decided_at: Utc::now(),
        })
    }

    /// Route every request independently and group by rail
    pub fn route_batch(&self, requests: &[SettlementRequest]) -> BatchRouting {
        let mut batch = BatchRouting::default();
        for request in requests {
            match self.route(request) {
                Ok(decision) => batch
                    .by_rail
                    .entry(decision.selected_rail)
                    .or_default()
                    .push(decision),
                Err(e) => batch.failures.push(BatchFailure::new(request.transfer_id, &e)),
            }
        }
        batch
    }

    async fn existing_response(&self, request: &SettlementRequest) -> Result<Option<SettlementResponse>> {
        let record = match self
            .records
            .find_by_transfer(&request.tenant_id, request.transfer_id)
            .await?
        {
            Some(record) => record,
            None => return Ok(None),
        };
        let mut response = SettlementResponse::from_record(&record);
        if let Some(windows) = &self.windows {
            response.queued_until = windows
                .queue_snapshot(Some(&record.tenant_id), Some(record.rail))
                .await?
                .into_iter()
                .find(|q| q.transfer_id == record.transfer_id)
                .map(|q| q.scheduled_for);
        }
        Ok(Some(response))
    }

    /// Route, record and execute (or queue) a transfer
    ///
    /// A transfer already known for the tenant returns its existing state.
    pub async fn settle(&self, request: SettlementRequest) -> Result<SettlementResponse> {
        request.validate()?;
        if let Some(existing) = self.existing_response(&request).await? {
            info!(
                transfer_id = %request.transfer_id,
                tenant = %request.tenant_id,
                "Settlement already exists, returning current state"
            );
            return Ok(existing);
        }
        let decision = self.route(&request)?;
        self.settle_routed(request, decision).await
    }

    async fn settle_routed(
        &self,
        request: SettlementRequest,
        decision: RoutingDecision,
    ) -> Result<SettlementResponse> {
        let now = Utc::now();
        let rail = decision.selected_rail;
        let fees = calculate_fee(request.amount, &decision.rail);

        let record = SettlementRecord {
            id: Uuid::new_v4(),
            transfer_id: request.transfer_id,
            tenant_id: request.tenant_id.clone(),
            rail,
            protocol: request.protocol,
            status: SettlementStatus::Pending,
            gross_amount: fees.gross,
            fee_amount: fees.fee,
            net_amount: fees.net,
            currency: request.source_currency.clone(),
            external_settlement_id: None,
            submitted_at: None,
            settled_at: None,
            estimated_completion: None,
            retry_count: request.retry_count.unwrap_or(0),
            max_retries: request.max_retries.unwrap_or(self.config.default_max_retries),
            next_retry_at: None,
            last_error: None,
            routing: Some(decision),
            request: request.clone(),
            reconciled_at: None,
            reconciliation_matched: None,
            created_at: now,
            updated_at: now,
        };

        match self.records.insert_record(record.clone()).await {
            Ok(()) => {}
            Err(Error::Conflict(_)) => {
                // lost a race with a concurrent settle for the same transfer
                return self
                    .existing_response(&request)
                    .await?
                    .ok_or_else(|| Error::not_found("settlement", request.transfer_id));
            }
            Err(e) => return Err(e),
        }

        info!(
            settlement_id = %record.id,
            transfer_id = %record.transfer_id,
            tenant = %record.tenant_id,
            rail = %rail,
            amount = %record.gross_amount,
            fee = %record.fee_amount,
            "Settlement created"
        );

        if let Some(windows) = &self.windows {
            if !windows.is_open(&record.tenant_id, rail, Some(now)).await? {
                let item = windows
                    .queue_transfer(&request, rail, Some(record.id), None, now)
                    .await?;
                let mut response = SettlementResponse::from_record(&record);
                response.queued_until = Some(item.scheduled_for);
                return Ok(response);
            }
        }

        let record = self.execute(record.id).await?;
        Ok(SettlementResponse::from_record(&record))
    }

    /// Settle requests concurrently, grouped by selected rail
    pub async fn settle_batch(&self, requests: Vec<SettlementRequest>) -> BatchSettlement {
        let mut batch = BatchSettlement::default();
        let mut groups: BTreeMap<Rail, Vec<(SettlementRequest, RoutingDecision)>> = BTreeMap::new();

        for request in requests {
            match self.existing_response(&request).await {
                Ok(Some(existing)) => {
                    batch.by_rail.entry(existing.rail).or_default().push(existing);
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    batch.failures.push(BatchFailure::new(request.transfer_id, &e));
                    continue;
                }
            }
            match self.route(&request) {
                Ok(decision) => groups
                    .entry(decision.selected_rail)
                    .or_default()
                    .push((request, decision)),
                Err(e) => batch.failures.push(BatchFailure::new(request.transfer_id, &e)),
            }
        }

        let group_results = join_all(groups.into_iter().map(|(rail, items)| async move {
            let results = join_all(items.into_iter().map(|(request, decision)| async move {
                let transfer_id = request.transfer_id;
                (transfer_id, self.settle_routed(request, decision).await)
            }))
            .await;
            (rail, results)
        }))
        .await;

        for (rail, results) in group_results {
            for (transfer_id, result) in results {
                match result {
                    Ok(response) => batch.by_rail.entry(rail).or_default().push(response),
                    Err(e) => batch.failures.push(BatchFailure::new(transfer_id, &e)),
                }
            }
        }
        batch
    }

    /// Execute a settlement under its lease
    pub async fn execute(&self, settlement_id: Uuid) -> Result<SettlementRecord> {
        if !self.records.try_begin_execution(settlement_id).await? {
            return Err(Error::ExecutionInProgress(settlement_id));
        }
        let result = self.execute_leased(settlement_id).await;
        if let Err(e) = self.records.end_execution(settlement_id).await {
            error!(%settlement_id, "Failed to release execution lease: {}", e);
        }
        result
    }

    async fn execute_leased(&self, settlement_id: Uuid) -> Result<SettlementRecord> {
        let mut record = self
            .records
            .get_record(settlement_id)
            .await?
            .ok_or_else(|| Error::not_found("settlement", settlement_id))?;
        if record.status.is_terminal() {
            return Ok(record);
        }

        let now = Utc::now();
        let first_submission = record.submitted_at.is_none();
        record.transition(SettlementStatus::Processing)?;
        record.next_retry_at = None;
        record.submitted_at.get_or_insert(now);
        record.updated_at = now;
        self.records.update_record(record.clone()).await?;

        if first_submission {
            self.publish(SettlementEvent::Initiated(SettlementEventPayload::from(&record)))
                .await;
        }

        let outcome = match self.adapters.executor(record.rail) {
            Ok(executor) => {
                let request = RailExecutionRequest {
                    settlement_id: record.id,
                    transfer_id: record.transfer_id,
                    tenant_id: record.tenant_id.clone(),
                    rail: record.rail,
                    amount: record.gross_amount,
                    fee: record.fee_amount,
                    net_amount: record.net_amount,
                    currency: record.currency.clone(),
                    destination_currency: record.request.destination_currency.clone(),
                    recipient: record.request.recipient.clone(),
                    attempt: record.retry_count,
                };
                let seconds = self.config.adapter_timeout_seconds;
                match tokio::time::timeout(Duration::from_secs(seconds), executor.execute(&request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(AdapterError::Timeout { seconds }),
                }
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => self.apply_result(record, result).await,
            Err(e) => {
                warn!(
                    settlement_id = %record.id,
                    transfer_id = %record.transfer_id,
                    rail = %record.rail,
                    attempt = record.retry_count,
                    "Rail execution failed: {}",
                    e
                );
                self.apply_failure(record, failure_from_adapter(&e)).await
            }
        }
    }

    async fn apply_result(
        &self,
        mut record: SettlementRecord,
        result: RailExecutionResult,
    ) -> Result<SettlementRecord> {
        let now = Utc::now();
        record.assign_external_id(&result.external_id)?;

        match result.status {
            SettlementStatus::Completed => {
                record.transition(SettlementStatus::Completed)?;
                record.settled_at = Some(now);
                record.last_error = None;
                record.updated_at = now;
                self.records.update_record(record.clone()).await?;
                SETTLEMENTS_TOTAL
                    .with_label_values(&[record.rail.as_str(), "completed"])
                    .inc();
                info!(
                    settlement_id = %record.id,
                    transfer_id = %record.transfer_id,
                    rail = %record.rail,
                    external_id = ?record.external_settlement_id,
                    "Settlement completed"
                );
                self.publish(SettlementEvent::Completed(SettlementEventPayload::from(&record)))
                    .await;
                Ok(record)
            }
            SettlementStatus::Pending | SettlementStatus::Processing => {
                let estimate = self
                    .catalog
                    .descriptor(record.rail)
                    .map(|d| now + ChronoDuration::seconds(d.estimated_settlement_seconds as i64));
                record.estimated_completion = result.estimated_completion.or(estimate);
                record.last_error = None;
                record.updated_at = now;
                self.records.update_record(record.clone()).await?;
                SETTLEMENTS_TOTAL
                    .with_label_values(&[record.rail.as_str(), "processing"])
                    .inc();
                info!(
                    settlement_id = %record.id,
                    rail = %record.rail,
                    estimated_completion = ?record.estimated_completion,
                    "Settlement accepted, awaiting rail completion"
                );
                Ok(record)
            }
            SettlementStatus::Failed => {
                let failure = result.error.unwrap_or_else(|| {
                    SettlementFailure::new("RAIL_FAILED", "rail reported failure", false)
                });
                self.apply_failure(record, failure).await
            }
        }
    }

    async fn apply_failure(
        &self,
        mut record: SettlementRecord,
        failure: SettlementFailure,
    ) -> Result<SettlementRecord> {
        let now = Utc::now();
        // halt_retries may have lowered the ceiling while the call was in flight
        if let Some(latest) = self.records.get_record(record.id).await? {
            record.max_retries = record.max_retries.min(latest.max_retries);
        }

        match self
            .retry
            .decide(&failure, record.retry_count, record.max_retries, now)
        {
            RetryDecision::Retry {
                next_retry_at,
                delay,
            } => {
                record.retry_count += 1;
                record.next_retry_at = Some(next_retry_at);
                record.last_error = Some(failure);
                record.updated_at = now;
                self.records.update_record(record.clone()).await?;
                RETRIES_SCHEDULED
                    .with_label_values(&[record.rail.as_str()])
                    .inc();
                warn!(
                    settlement_id = %record.id,
                    transfer_id = %record.transfer_id,
                    rail = %record.rail,
                    retry = record.retry_count,
                    max_retries = record.max_retries,
                    delay_secs = delay.num_seconds(),
                    "Retry scheduled"
                );
                Ok(record)
            }
            decision => {
                record.transition(SettlementStatus::Failed)?;
                record.next_retry_at = None;
                record.last_error = Some(failure);
                record.updated_at = now;
                self.records.update_record(record.clone()).await?;
                SETTLEMENTS_TOTAL
                    .with_label_values(&[record.rail.as_str(), "failed"])
                    .inc();
                error!(
                    settlement_id = %record.id,
                    transfer_id = %record.transfer_id,
                    rail = %record.rail,
                    exhausted = decision == RetryDecision::Exhausted,
                    error = ?record.last_error,
                    "Settlement failed"
                );
                self.publish(SettlementEvent::Failed(SettlementEventPayload::from(&record)))
                    .await;
                Ok(record)
            }
        }
    }

    /// Re-execute due retries
    pub async fn process_due_retries(&self, now: DateTime<Utc>, limit: usize) -> Result<RetrySweep> {
        let due = self.records.claim_due_retries(now, limit).await?;
        let mut sweep = RetrySweep {
            claimed: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return Ok(sweep);
        }

        let results = join_all(due.iter().map(|record| async move {
            let result = self.execute_leased(record.id).await;
            if let Err(e) = self.records.end_execution(record.id).await {
                error!(settlement_id = %record.id, "Failed to release execution lease: {}", e);
            }
            (record.id, result)
        }))
        .await;

        for (settlement_id, result) in results {
            match result {
                Ok(record) => match record.status {
                    SettlementStatus::Completed => sweep.completed += 1,
                    SettlementStatus::Failed => sweep.failed += 1,
                    _ => sweep.processing += 1,
                },
                Err(e) => {
                    sweep.failed += 1;
                    error!(%settlement_id, "Retry execution error: {}", e);
                }
            }
        }

        info!(
            claimed = sweep.claimed,
            completed = sweep.completed,
            processing = sweep.processing,
            failed = sweep.failed,
            "Retry sweep finished"
        );
        Ok(sweep)
    }

    /// Drain queued transfers whose window has opened, plus urgent ones
    pub async fn process_window_queue(&self, now: DateTime<Utc>, limit: usize) -> Result<QueueDrain> {
        let windows = match &self.windows {
            Some(w) => w.clone(),
            None => return Ok(QueueDrain::default()),
        };

        let claimed = windows.claim_due(now, limit).await?;
        let mut drain = QueueDrain {
            claimed: claimed.len(),
            ..Default::default()
        };

        let mut by_rail: BTreeMap<Rail, Vec<QueuedTransfer>> = BTreeMap::new();
        for item in claimed {
            by_rail.entry(item.rail).or_default().push(item);
        }

        for (rail, items) in by_rail {
            let started_at = Utc::now();
            let mut scheduled_at: Option<DateTime<Utc>> = None;
            let mut total_amount = Decimal::ZERO;
            let (mut success_count, mut failure_count) = (0usize, 0usize);

            for item in items {
                let gated = item.priority != QueuePriority::Urgent
                    && !windows.is_open(&item.tenant_id, rail, Some(now)).await?;
                if gated {
                    let next = windows.next_window(&item.tenant_id, rail, now).await?;
                    debug!(
                        transfer_id = %item.transfer_id,
                        rail = %rail,
                        next = %next.next_window_at,
                        "Window closed again, rescheduling"
                    );
                    windows.reschedule_queued(item, next.next_window_at).await?;
                    drain.rescheduled += 1;
                    continue;
                }

                let (scheduled_for, amount) = (item.scheduled_for, item.amount);
                let success = match self.execute_queued(&item).await {
                    Ok(record) => record.status != SettlementStatus::Failed,
                    Err(Error::ExecutionInProgress(_)) => {
                        // a retry holds the lease; leave the item for the next sweep
                        windows.reschedule_queued(item, now).await?;
                        drain.rescheduled += 1;
                        continue;
                    }
                    Err(e) => {
                        error!(transfer_id = %item.transfer_id, rail = %rail, "Queued settlement failed: {}", e);
                        false
                    }
                };
                windows.complete_queued(item, success).await?;
                if success {
                    success_count += 1;
                } else {
                    failure_count += 1;
                }
                scheduled_at = Some(scheduled_at.map_or(scheduled_for, |s| s.min(scheduled_for)));
                total_amount += amount;
            }

            let transfer_count = success_count + failure_count;
            if transfer_count == 0 {
                continue;
            }
            let scheduled_at = scheduled_at.unwrap_or(now).min(now);
            let execution = SettlementExecution {
                id: Uuid::new_v4(),
                rail,
                window_id: SettlementExecution::window_id(rail, scheduled_at),
                scheduled_at,
                started_at,
                completed_at: Utc::now(),
                transfer_count,
                total_amount,
                success_count,
                failure_count,
                status: SettlementExecution::status_for(success_count, failure_count),
            };
            windows.record_execution(execution.clone()).await?;
            drain.submitted += success_count;
            drain.failed += failure_count;
            drain.executions.push(execution);
        }

        Ok(drain)
    }

    async fn execute_queued(&self, item: &QueuedTransfer) -> Result<SettlementRecord> {
        let settlement_id = match item.settlement_id {
            Some(id) => id,
            None => self
                .records
                .find_by_transfer(&item.tenant_id, item.transfer_id)
                .await?
                .map(|r| r.id)
                .ok_or_else(|| Error::not_found("settlement", item.transfer_id))?,
        };
        self.execute(settlement_id).await
    }

    /// Cancel a queued transfer and fail its pending record
    pub async fn cancel_queued(
        &self,
        tenant_id: &TenantId,
        transfer_id: Uuid,
    ) -> Result<Option<SettlementResponse>> {
        let windows = match &self.windows {
            Some(w) => w,
            None => return Ok(None),
        };
        if windows.cancel_queued(tenant_id, transfer_id).await?.is_none() {
            return Ok(None);
        }

        let mut record = match self.records.find_by_transfer(tenant_id, transfer_id).await? {
            Some(record) => record,
            None => return Ok(None),
        };
        if !record.status.is_terminal() {
            record.transition(SettlementStatus::Failed)?;
            record.last_error = Some(SettlementFailure::new(
                "CANCELLED",
                "queued transfer cancelled before execution",
                false,
            ));
            self.records.update_record(record.clone()).await?;
            SETTLEMENTS_TOTAL
                .with_label_values(&[record.rail.as_str(), "cancelled"])
                .inc();
            self.publish(SettlementEvent::Failed(SettlementEventPayload::from(&record)))
                .await;
        }
        Ok(Some(SettlementResponse::from_record(&record)))
    }

    /// Stop further retries of a settlement
    pub async fn halt_retries(&self, settlement_id: Uuid) -> Result<SettlementRecord> {
        let now = Utc::now();
        let mut record = self.records.cap_retries(settlement_id, now).await?;
        if record.status.is_terminal() {
            return Ok(record);
        }

        if record.next_retry_at.is_some() && self.records.try_begin_execution(settlement_id).await? {
            // re-read under the lease; an attempt may have finished since the cap
            record = self.get_settlement(settlement_id).await?;
            if record.status.is_terminal() || record.next_retry_at.is_none() {
                self.records.end_execution(settlement_id).await?;
                info!(%settlement_id, status = %record.status, "Retries halted");
                return Ok(record);
            }
            record.transition(SettlementStatus::Failed)?;
            record.next_retry_at = None;
            record.last_error = Some(SettlementFailure::new(
                "RETRIES_HALTED",
                "retries halted by operator",
                false,
            ));
            record.updated_at = now;
            let saved = self.records.update_record(record.clone()).await;
            self.records.end_execution(settlement_id).await?;
            saved?;
            self.publish(SettlementEvent::Failed(SettlementEventPayload::from(&record)))
                .await;
        }

        info!(%settlement_id, status = %record.status, "Retries halted");
        Ok(record)
    }

    /// Settlement by ID
    pub async fn get_settlement(&self, settlement_id: Uuid) -> Result<SettlementRecord> {
        self.records
            .get_record(settlement_id)
            .await?
            .ok_or_else(|| Error::not_found("settlement", settlement_id))
    }

    /// Settlement by tenant and transfer
    pub async fn get_settlement_by_transfer(
        &self,
        tenant_id: &TenantId,
        transfer_id: Uuid,
    ) -> Result<SettlementRecord> {
        self.records
            .find_by_transfer(tenant_id, transfer_id)
            .await?
            .ok_or_else(|| Error::not_found("settlement", transfer_id))
    }

    async fn publish(&self, event: SettlementEvent) {
        let name = event.name();
        if let Err(e) = self.events.publish(event).await {
            warn!(event = name, "Event publish failed: {}", e);
        }
    }
}
