//! Settlement window management
//!
//! Decides whether a rail accepts submissions right now, when it will next
//! accept them, and keeps the queue of transfers waiting for that moment.
//!
//! # Design
//!
//! - `realtime` rails are always open
//! - Other rails are gated by the rail country's holiday calendar, then by
//!   their frequency rule, then by an optional absolute cutoff
//! - All local-time arithmetic goes through the IANA timezone database
//! - Queue drains claim items atomically in the store before execution

pub mod holiday;
pub mod queue;
pub mod schedule;

pub use holiday::{Closure, Holiday};
pub use queue::{
    ExecutionStatus, QueuePriority, QueueStats, QueueStatus, QueuedTransfer, SettlementExecution,
};
pub use schedule::{parse_hhmm, parse_timezone, SettlementWindowConfig, WindowFrequency};

use crate::catalog::RailCatalog;
use crate::config::WindowSettings;
use crate::metrics::QUEUE_DEPTH;
use crate::store::WindowStore;
use crate::types::{Operator, Rail, SettlementRequest, TenantId};
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use schedule::{next_day, to_utc, ResolvedSchedule};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Window state of a rail for one tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextWindowInfo {
    /// Tenant
    pub tenant_id: TenantId,
    /// Rail
    pub rail: Rail,
    /// Frequency in effect
    pub frequency: WindowFrequency,
    /// Timezone in effect
    pub timezone: String,
    /// Whether the rail accepts submissions now
    pub is_open_now: bool,
    /// Next window start, never before the evaluation instant
    pub next_window_at: DateTime<Utc>,
    /// Close of the window open now
    pub current_window_closes_at: Option<DateTime<Utc>>,
    /// Whether today is a holiday for the rail
    pub is_holiday_today: bool,
    /// Name of today's holiday
    pub holiday_name: Option<String>,
    /// Transfers waiting
    pub queue_depth: usize,
    /// Gross amount waiting
    pub queued_amount: Decimal,
}

/// Result of an emergency override
#[derive(Debug, Clone, PartialEq)]
pub enum EmergencyOutcome {
    /// Queue item moved to the front with `scheduled_for = now`
    Expedited(QueuedTransfer),
    /// Item is already being drained
    AlreadyProcessing(QueuedTransfer),
    /// Transfer was never gated and can proceed immediately
    NotQueued,
}

/// Settlement window manager
pub struct SettlementWindowManager {
    store: Arc<dyn WindowStore>,
    settings: WindowSettings,
}

impl std::fmt::Debug for SettlementWindowManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementWindowManager")
            .field("settings", &self.settings)
            .finish()
    }
}

impl SettlementWindowManager {
    /// Create new window manager
    pub fn new(store: Arc<dyn WindowStore>, settings: WindowSettings) -> Self {
        Self { store, settings }
    }

    /// Effective config: the stored active config, else the rail default
    pub async fn get_config(&self, tenant_id: &TenantId, rail: Rail) -> Result<SettlementWindowConfig> {
        match self.store.get_window_config(tenant_id, rail).await? {
            Some(config) if config.active => Ok(config),
            _ => Ok(SettlementWindowConfig::default_for(tenant_id.clone(), rail)),
        }
    }

    /// Validate and upsert a config
    pub async fn save_config(&self, config: SettlementWindowConfig) -> Result<()> {
        ResolvedSchedule::new(&config, &self.settings)?;
        info!(
            tenant = %config.tenant_id,
            rail = %config.rail,
            frequency = %config.frequency,
            "Saving window config"
        );
        self.store.save_window_config(config).await
    }

    /// Remove a stored config, reverting to the default
    pub async fn delete_config(&self, tenant_id: &TenantId, rail: Rail) -> Result<bool> {
        self.store.delete_window_config(tenant_id, rail).await
    }

    /// Stored configs for a tenant
    pub async fn list_configs(&self, tenant_id: &TenantId) -> Result<Vec<SettlementWindowConfig>> {
        self.store.list_window_configs(tenant_id).await
    }

    /// Add or replace a holiday
    pub async fn add_holiday(&self, holiday: Holiday, operator: &Operator) -> Result<Holiday> {
        operator.require_admin("holiday calendar update")?;
        if let Closure::Partial { start, end } = holiday.closure {
            if start >= end {
                return Err(Error::InvalidWindowConfig(format!(
                    "partial closure {}..{} is empty",
                    start, end
                )));
            }
        }
        info!(
            country = %holiday.country,
            date = %holiday.date,
            name = %holiday.name,
            operator = %operator.id,
            "Holiday saved"
        );
        self.store.save_holiday(holiday.clone()).await?;
        Ok(holiday)
    }

    /// Delete a holiday
    pub async fn remove_holiday(&self, id: Uuid, operator: &Operator) -> Result<Holiday> {
        operator.require_admin("holiday calendar update")?;
        let removed = self
            .store
            .delete_holiday(id)
            .await?
            .ok_or_else(|| Error::not_found("holiday", id))?;
        info!(holiday_id = %id, operator = %operator.id, "Holiday removed");
        Ok(removed)
    }

    /// Holidays in `[from, to]`
    pub async fn list_holidays(
        &self,
        country: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Holiday>> {
        self.store.list_holidays(country, from, to).await
    }

    async fn schedule(&self, tenant_id: &TenantId, rail: Rail) -> Result<ResolvedSchedule> {
        let config = self.get_config(tenant_id, rail).await?;
        ResolvedSchedule::new(&config, &self.settings)
    }

    async fn holidays_on(&self, rail: Rail, date: NaiveDate) -> Result<Vec<Holiday>> {
        let country = match RailCatalog::holiday_country(rail) {
            Some(c) => c,
            None => return Ok(Vec::new()),
        };
        let holidays = self.store.list_holidays(Some(country), date, date).await?;
        Ok(holidays.into_iter().filter(|h| h.applies_to(rail)).collect())
    }

    async fn blocking_holiday(&self, rail: Rail, local: NaiveDateTime) -> Result<Option<Holiday>> {
        Ok(self
            .holidays_on(rail, local.date())
            .await?
            .into_iter()
            .find(|h| h.blocks(rail, local.time())))
    }

    /// Whether the rail accepts submissions at `as_of` (default now)
    pub async fn is_open(
        &self,
        tenant_id: &TenantId,
        rail: Rail,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let schedule = self.schedule(tenant_id, rail).await?;
        self.is_open_with(&schedule, rail, as_of.unwrap_or_else(Utc::now))
            .await
    }

    async fn is_open_with(
        &self,
        schedule: &ResolvedSchedule,
        rail: Rail,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        if schedule.frequency == WindowFrequency::Realtime {
            return Ok(true);
        }
        let local = at.with_timezone(&schedule.tz).naive_local();
        if let Some(holiday) = self.blocking_holiday(rail, local).await? {
            debug!(rail = %rail, holiday = %holiday.name, "Rail closed for holiday");
            return Ok(false);
        }
        Ok(schedule.is_open_local(local))
    }

    /// Window state evaluated at `now`
    pub async fn next_window(
        &self,
        tenant_id: &TenantId,
        rail: Rail,
        now: DateTime<Utc>,
    ) -> Result<NextWindowInfo> {
        let config = self.get_config(tenant_id, rail).await?;
        let schedule = ResolvedSchedule::new(&config, &self.settings)?;
        let local_now = now.with_timezone(&schedule.tz).naive_local();

        let todays = self.holidays_on(rail, local_now.date()).await?;
        let is_open_now = self.is_open_with(&schedule, rail, now).await?;
        let stats = self.store.queue_stats(Some(tenant_id), rail).await?;

        let (next_window_at, current_window_closes_at) =
            if schedule.frequency == WindowFrequency::Realtime {
                (now, None)
            } else {
                let next = self.next_open_local(&schedule, rail, local_now).await?;
                let closes = if is_open_now {
                    schedule
                        .close_of_open_window(local_now)
                        .map(|close| to_utc(schedule.tz, close))
                } else {
                    None
                };
                (to_utc(schedule.tz, next).max(now), closes)
            };

        Ok(NextWindowInfo {
            tenant_id: tenant_id.clone(),
            rail,
            frequency: schedule.frequency,
            timezone: config.timezone,
            is_open_now,
            next_window_at,
            current_window_closes_at,
            is_holiday_today: !todays.is_empty(),
            holiday_name: todays.first().map(|h| h.name.clone()),
            queue_depth: stats.depth,
            queued_amount: stats.amount,
        })
    }

    /// Walk forward from `local_now` past holidays to the next window start
    async fn next_open_local(
        &self,
        schedule: &ResolvedSchedule,
        rail: Rail,
        local_now: NaiveDateTime,
    ) -> Result<NaiveDateTime> {
        let mut cursor = local_now;
        let mut inclusive = false;

        if let Some(holiday) = self.blocking_holiday(rail, local_now).await? {
            if holiday.is_full_day() {
                cursor = next_day(local_now.date()).and_time(schedule.day_start());
                inclusive = true;
            }
        }

        let mut candidate = schedule.next_window_local(cursor, inclusive);
        for _ in 0..self.settings.holiday_lookahead_days.max(1) * 24 {
            let holiday = match self.blocking_holiday(rail, candidate).await? {
                Some(h) => h,
                None => return Ok(candidate),
            };
            cursor = match holiday.closure {
                Closure::FullDay => next_day(candidate.date()).and_time(schedule.day_start()),
                Closure::Partial { end, .. } => candidate.date().and_time(end),
            };
            inclusive = true;
            candidate = schedule.next_window_local(cursor, inclusive);
        }

        warn!(rail = %rail, from = %local_now, "Holiday look-ahead exhausted");
        Ok(candidate)
    }

    /// Queue a transfer for its rail's next window
    pub async fn queue_transfer(
        &self,
        request: &SettlementRequest,
        rail: Rail,
        settlement_id: Option<Uuid>,
        priority: Option<QueuePriority>,
        now: DateTime<Utc>,
    ) -> Result<QueuedTransfer> {
        let info = self.next_window(&request.tenant_id, rail, now).await?;
        let item = QueuedTransfer {
            id: Uuid::new_v4(),
            tenant_id: request.tenant_id.clone(),
            transfer_id: request.transfer_id,
            settlement_id,
            rail,
            amount: request.amount,
            currency: request.source_currency.clone(),
            priority: priority.unwrap_or_default(),
            status: QueueStatus::Queued,
            scheduled_for: info.next_window_at,
            enqueued_at: now,
            updated_at: now,
            request: request.clone(),
            metadata: serde_json::json!({}),
        };

        self.store.enqueue(item.clone()).await?;
        QUEUE_DEPTH.with_label_values(&[rail.as_str()]).inc();

        info!(
            transfer_id = %item.transfer_id,
            tenant = %item.tenant_id,
            rail = %rail,
            scheduled_for = %item.scheduled_for,
            "Transfer queued for next settlement window"
        );
        Ok(item)
    }

    /// Expedite a queued transfer past window gating
    pub async fn process_emergency_settlement(
        &self,
        tenant_id: &TenantId,
        transfer_id: Uuid,
        reason: &str,
        operator: &Operator,
        now: DateTime<Utc>,
    ) -> Result<EmergencyOutcome> {
        operator.require_operator("emergency settlement")?;

        let mut item = match self.store.find_queued(tenant_id, transfer_id).await? {
            Some(item) => item,
            None => {
                info!(%transfer_id, tenant = %tenant_id, "Emergency settlement: transfer not queued");
                return Ok(EmergencyOutcome::NotQueued);
            }
        };
        if item.status == QueueStatus::Processing {
            return Ok(EmergencyOutcome::AlreadyProcessing(item));
        }

        item.priority = QueuePriority::Urgent;
        item.scheduled_for = now;
        item.updated_at = now;
        let audit = serde_json::json!({
            "reason": reason,
            "operator": operator.id,
            "requested_at": now,
        });
        match item.metadata.as_object_mut() {
            Some(map) => {
                map.insert("emergency".to_string(), audit);
            }
            None => item.metadata = serde_json::json!({ "emergency": audit }),
        }

        self.store.update_queued(item.clone()).await?;
        warn!(
            %transfer_id,
            tenant = %tenant_id,
            rail = %item.rail,
            operator = %operator.id,
            reason,
            "Emergency settlement override"
        );
        Ok(EmergencyOutcome::Expedited(item))
    }

    /// Atomically claim due and urgent items
    pub async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueuedTransfer>> {
        let claimed = self.store.claim_due_queued(now, limit).await?;
        for item in &claimed {
            QUEUE_DEPTH.with_label_values(&[item.rail.as_str()]).dec();
        }
        if !claimed.is_empty() {
            debug!(count = claimed.len(), "Claimed queued transfers");
        }
        Ok(claimed)
    }

    /// Put a claimed item back for a later window
    pub async fn reschedule_queued(
        &self,
        mut item: QueuedTransfer,
        scheduled_for: DateTime<Utc>,
    ) -> Result<QueuedTransfer> {
        item.status = QueueStatus::Queued;
        item.scheduled_for = scheduled_for;
        item.updated_at = Utc::now();
        self.store.update_queued(item.clone()).await?;
        QUEUE_DEPTH.with_label_values(&[item.rail.as_str()]).inc();
        Ok(item)
    }

    /// Close out a claimed item
    pub async fn complete_queued(&self, mut item: QueuedTransfer, success: bool) -> Result<QueuedTransfer> {
        item.status = if success {
            QueueStatus::Settled
        } else {
            QueueStatus::Failed
        };
        item.updated_at = Utc::now();
        self.store.update_queued(item.clone()).await?;
        Ok(item)
    }

    /// Remove a transfer that is still waiting; `None` when it was not queued
    pub async fn cancel_queued(
        &self,
        tenant_id: &TenantId,
        transfer_id: Uuid,
    ) -> Result<Option<QueuedTransfer>> {
        let item = match self.store.find_queued(tenant_id, transfer_id).await? {
            Some(item) => item,
            None => return Ok(None),
        };
        if item.status == QueueStatus::Processing {
            return Err(Error::Conflict(format!(
                "transfer {} is already being drained",
                transfer_id
            )));
        }
        let removed = self.store.remove_queued(item.id).await?;
        if let Some(item) = &removed {
            QUEUE_DEPTH.with_label_values(&[item.rail.as_str()]).dec();
            info!(%transfer_id, rail = %item.rail, "Queued transfer cancelled");
        }
        Ok(removed)
    }

    /// Active queue items in drain order
    pub async fn queue_snapshot(
        &self,
        tenant_id: Option<&TenantId>,
        rail: Option<Rail>,
    ) -> Result<Vec<QueuedTransfer>> {
        self.store.list_queued(tenant_id, rail).await
    }

    /// Store a batch log
    pub async fn record_execution(&self, execution: SettlementExecution) -> Result<()> {
        info!(
            rail = %execution.rail,
            window_id = %execution.window_id,
            transfers = execution.transfer_count,
            succeeded = execution.success_count,
            failed = execution.failure_count,
            "Settlement window executed"
        );
        self.store.record_execution(execution).await
    }

    /// Recent batch logs, newest first
    pub async fn executions(&self, rail: Option<Rail>, limit: usize) -> Result<Vec<SettlementExecution>> {
        self.store.list_executions(rail, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::types::Protocol;
    use chrono::{NaiveTime, TimeZone};
    use rust_decimal_macros::dec;

    fn manager() -> SettlementWindowManager {
        SettlementWindowManager::new(Arc::new(InMemoryStore::new()), WindowSettings::default())
    }

    fn tenant() -> TenantId {
        TenantId::new("acme")
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    async fn hourly_utc(m: &SettlementWindowManager, rail: Rail) {
        let mut config = SettlementWindowConfig::default_for(tenant(), rail);
        config.frequency = WindowFrequency::Hourly;
        config.cutoff_hour = Some(17);
        config.cutoff_minute = Some(0);
        config.timezone = "UTC".to_string();
        m.save_config(config).await.unwrap();
    }

    #[tokio::test]
    async fn test_realtime_always_open() {
        let m = manager();
        let christmas = NaiveDate::from_ymd_opt(2026, 12, 25).unwrap();
        m.add_holiday(Holiday::new("BR", christmas, "Natal"), &Operator::admin("root"))
            .await
            .unwrap();
        assert!(m
            .is_open(&tenant(), Rail::Pix, Some(utc(2026, 12, 25, 3, 0)))
            .await
            .unwrap());
        let info = m.next_window(&tenant(), Rail::Pix, utc(2026, 12, 25, 3, 0)).await.unwrap();
        assert_eq!(info.next_window_at, utc(2026, 12, 25, 3, 0));
        assert!(info.is_holiday_today);
    }

    #[tokio::test]
    async fn test_hourly_cutoff_and_holiday() {
        let m = manager();
        hourly_utc(&m, Rail::Ach).await;

        assert!(m.is_open(&tenant(), Rail::Ach, Some(utc(2026, 3, 10, 16, 59))).await.unwrap());
        assert!(!m.is_open(&tenant(), Rail::Ach, Some(utc(2026, 3, 10, 17, 5))).await.unwrap());

        let day = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        m.add_holiday(Holiday::new("US", day, "Closure"), &Operator::admin("root"))
            .await
            .unwrap();
        assert!(!m.is_open(&tenant(), Rail::Ach, Some(utc(2026, 3, 10, 10, 0))).await.unwrap());

        // holiday restricted to another rail does not block
        let next = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
        m.add_holiday(
            Holiday::new("US", next, "Wire outage").for_rails(vec![Rail::Wire]),
            &Operator::admin("root"),
        )
        .await
        .unwrap();
        assert!(m.is_open(&tenant(), Rail::Ach, Some(utc(2026, 3, 11, 10, 0))).await.unwrap());
    }

    #[tokio::test]
    async fn test_next_window_skips_consecutive_holidays() {
        let m = manager();
        hourly_utc(&m, Rail::Ach).await;
        let admin = Operator::admin("root");
        for d in [10, 11] {
            let date = NaiveDate::from_ymd_opt(2026, 3, d).unwrap();
            m.add_holiday(Holiday::new("US", date, "Closure"), &admin).await.unwrap();
        }

        let info = m.next_window(&tenant(), Rail::Ach, utc(2026, 3, 10, 9, 30)).await.unwrap();
        assert!(!info.is_open_now);
        assert!(info.is_holiday_today);
        assert_eq!(info.next_window_at, utc(2026, 3, 12, 8, 0));
    }

    #[tokio::test]
    async fn test_partial_closure_defers_to_its_end() {
        let m = manager();
        hourly_utc(&m, Rail::Ach).await;
        let date = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let holiday = Holiday::new("US", date, "Early close").partial(
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
        );
        m.add_holiday(holiday, &Operator::admin("root")).await.unwrap();

        assert!(m.is_open(&tenant(), Rail::Ach, Some(utc(2026, 3, 10, 9, 30))).await.unwrap());
        assert!(!m.is_open(&tenant(), Rail::Ach, Some(utc(2026, 3, 10, 11, 0))).await.unwrap());

        let info = m.next_window(&tenant(), Rail::Ach, utc(2026, 3, 10, 9, 30)).await.unwrap();
        assert_eq!(info.next_window_at, utc(2026, 3, 10, 13, 0));
    }

    #[tokio::test]
    async fn test_next_window_in_rail_timezone() {
        let m = manager();
        // wire default: daily 09:00 America/New_York, cutoff 18:00
        let info = m.next_window(&tenant(), Rail::Wire, utc(2026, 1, 15, 20, 0)).await.unwrap();
        assert!(info.is_open_now);
        assert_eq!(info.next_window_at, utc(2026, 1, 16, 14, 0));
        assert_eq!(info.current_window_closes_at, Some(utc(2026, 1, 15, 23, 0)));
    }

    #[tokio::test]
    async fn test_holiday_crud_requires_admin() {
        let m = manager();
        let date = NaiveDate::from_ymd_opt(2026, 7, 4).unwrap();
        let err = m
            .add_holiday(Holiday::new("US", date, "Independence Day"), &Operator::operator("ops"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));

        let saved = m
            .add_holiday(Holiday::new("US", date, "Independence Day"), &Operator::admin("root"))
            .await
            .unwrap();
        assert_eq!(m.list_holidays(Some("us"), date, date).await.unwrap().len(), 1);
        assert!(m.remove_holiday(saved.id, &Operator::viewer("v")).await.is_err());
        m.remove_holiday(saved.id, &Operator::admin("root")).await.unwrap();
        assert!(m.list_holidays(None, date, date).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_config_falls_back_to_default() {
        let m = manager();
        let mut config = SettlementWindowConfig::default_for(tenant(), Rail::Sepa);
        config.frequency = WindowFrequency::Realtime;
        config.active = false;
        m.save_config(config).await.unwrap();

        let effective = m.get_config(&tenant(), Rail::Sepa).await.unwrap();
        assert_eq!(effective.frequency, WindowFrequency::Hourly);
        assert_eq!(m.list_configs(&tenant()).await.unwrap().len(), 1);
        assert!(m.delete_config(&tenant(), Rail::Sepa).await.unwrap());
    }

    #[tokio::test]
    async fn test_save_rejects_config_that_never_opens() {
        let m = manager();
        let mut config = SettlementWindowConfig::default_for(tenant(), Rail::Wire);
        config.scheduled_times = vec!["09:00".to_string()];
        config.cutoff_hour = Some(8);
        config.cutoff_minute = Some(0);
        assert!(matches!(
            m.save_config(config).await,
            Err(Error::InvalidWindowConfig(_))
        ));

        let mut hourly = SettlementWindowConfig::default_for(tenant(), Rail::Sepa);
        hourly.cutoff_hour = Some(8);
        assert!(m.save_config(hourly).await.is_err());

        assert!(m.list_configs(&tenant()).await.unwrap().is_empty());
        let effective = m.get_config(&tenant(), Rail::Wire).await.unwrap();
        assert_eq!(effective.cutoff_hour, Some(18));
    }

    #[tokio::test]
    async fn test_queue_emergency_and_claim_order() {
        let m = manager();
        hourly_utc(&m, Rail::Ach).await;
        let now = utc(2026, 3, 10, 18, 0);

        let first = SettlementRequest::new(tenant(), Protocol::Acp, dec!(10), "USD");
        let second = SettlementRequest::new(tenant(), Protocol::Acp, dec!(20), "USD");
        let a = m.queue_transfer(&first, Rail::Ach, None, None, now).await.unwrap();
        m.queue_transfer(&second, Rail::Ach, None, None, now).await.unwrap();
        assert_eq!(a.scheduled_for, utc(2026, 3, 11, 8, 0));
        assert_eq!(a.priority, QueuePriority::Normal);

        assert!(matches!(
            m.queue_transfer(&first, Rail::Ach, None, None, now).await,
            Err(Error::AlreadyQueued { .. })
        ));

        let outcome = m
            .process_emergency_settlement(&tenant(), second.transfer_id, "payroll", &Operator::operator("ops"), now)
            .await
            .unwrap();
        match outcome {
            EmergencyOutcome::Expedited(item) => {
                assert_eq!(item.priority, QueuePriority::Urgent);
                assert_eq!(item.metadata["emergency"]["operator"], "ops");
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let claimed = m.claim_due(now, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].transfer_id, second.transfer_id);
        assert!(m.claim_due(now, 10).await.unwrap().is_empty());

        let unknown = m
            .process_emergency_settlement(&tenant(), Uuid::new_v4(), "x", &Operator::operator("ops"), now)
            .await
            .unwrap();
        assert_eq!(unknown, EmergencyOutcome::NotQueued);
    }

    #[tokio::test]
    async fn test_cancel_queued() {
        let m = manager();
        hourly_utc(&m, Rail::Ach).await;
        let now = utc(2026, 3, 10, 18, 0);
        let request = SettlementRequest::new(tenant(), Protocol::Acp, dec!(10), "USD");
        m.queue_transfer(&request, Rail::Ach, None, None, now).await.unwrap();

        let removed = m.cancel_queued(&tenant(), request.transfer_id).await.unwrap();
        assert!(removed.is_some());
        assert!(m.queue_snapshot(Some(&tenant()), None).await.unwrap().is_empty());
        assert!(m.cancel_queued(&tenant(), request.transfer_id).await.unwrap().is_none());
    }
}
