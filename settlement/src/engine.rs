//! Main settlement engine
//!
//! Wires the router, window manager and reconciliation engine around shared
//! stores, and hosts the periodic sweeps that none of them run on their own.

use crate::{
    adapters::AdapterRegistry,
    catalog::RailCatalog,
    config::EngineConfig,
    events::EventSink,
    reconciliation::{ReconciliationEngine, ReconciliationReport},
    router::{QueueDrain, RetrySweep, SettlementRouter},
    store::{InMemoryStore, ReconciliationStore, RecordStore, WindowStore},
    types::{Rail, SettlementRequest, SettlementResponse},
    window::SettlementWindowManager,
    Error, Result,
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Outcome of one scheduler tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Retry sweep
    pub retries: RetrySweep,
    /// Window queue drain
    pub drain: QueueDrain,
    /// Reconciliation runs started this tick
    pub reconciliations: Vec<ReconciliationReport>,
}

/// Settlement engine
pub struct SettlementEngine {
    /// Router
    router: Arc<SettlementRouter>,

    /// Window manager
    windows: Arc<SettlementWindowManager>,

    /// Reconciliation engine
    reconciliation: Arc<ReconciliationEngine>,

    /// Adapters, for the reconciliation sweep's rail list
    adapters: AdapterRegistry,

    /// Configuration
    config: EngineConfig,

    /// End of the last period reconciled by the sweep
    last_reconciled: Mutex<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for SettlementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementEngine")
            .field("router", &self.router)
            .field("windows", &self.windows)
            .field("reconciliation", &self.reconciliation)
            .field("config", &self.config)
            .finish()
    }
}

impl SettlementEngine {
    /// Create engine over one store backing every store trait
    pub fn new<S>(
        config: EngineConfig,
        store: Arc<S>,
        adapters: AdapterRegistry,
        events: Arc<dyn EventSink>,
    ) -> Result<Self>
    where
        S: RecordStore + WindowStore + ReconciliationStore + 'static,
    {
        config.validate()?;

        let catalog = Arc::new(RailCatalog::with_overrides(&config.rails));
        let windows = Arc::new(SettlementWindowManager::new(
            store.clone(),
            config.window.clone(),
        ));
        let router = Arc::new(
            SettlementRouter::new(
                catalog,
                adapters.clone(),
                store.clone(),
                events.clone(),
                config.router.clone(),
            )
            .with_windows(windows.clone()),
        );
        let reconciliation = Arc::new(ReconciliationEngine::new(
            store.clone(),
            store,
            adapters.clone(),
            events,
            config.reconciliation.clone(),
            Duration::from_secs(config.router.adapter_timeout_seconds),
        ));

        info!(
            rails = config.rails.len(),
            sweep_interval_secs = config.scheduler.sweep_interval_seconds,
            "Settlement engine initialized"
        );

        Ok(Self {
            router,
            windows,
            reconciliation,
            adapters,
            config,
            last_reconciled: Mutex::new(None),
        })
    }

    /// Engine over a fresh in-memory store
    pub fn in_memory(
        config: EngineConfig,
        adapters: AdapterRegistry,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        Self::new(config, Arc::new(InMemoryStore::new()), adapters, events)
    }

    /// Router
    pub fn router(&self) -> &Arc<SettlementRouter> {
        &self.router
    }

    /// Window manager
    pub fn windows(&self) -> &Arc<SettlementWindowManager> {
        &self.windows
    }

    /// Reconciliation engine
    pub fn reconciliation(&self) -> &Arc<ReconciliationEngine> {
        &self.reconciliation
    }

    /// Configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Settle a transfer through the router
    pub async fn settle(&self, request: SettlementRequest) -> Result<SettlementResponse> {
        self.router.settle(request).await
    }

    /// Run every periodic operation once
    pub async fn run_sweeps(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let retries = self
            .router
            .process_due_retries(now, self.config.router.retry_batch_size)
            .await?;
        let drain = self
            .router
            .process_window_queue(now, self.config.window.drain_batch_size)
            .await?;
        let reconciliations = if self.config.scheduler.reconciliation_enabled {
            self.reconcile_closed_period(now).await?
        } else {
            Vec::new()
        };

        Ok(SweepReport {
            retries,
            drain,
            reconciliations,
        })
    }

    /// Reconcile every queryable rail over the most recent closed period
    ///
    /// Runs at most once per period; missed periods are not back-filled.
    pub async fn reconcile_closed_period(&self, now: DateTime<Utc>) -> Result<Vec<ReconciliationReport>> {
        let period = ChronoDuration::minutes(self.config.scheduler.reconciliation_period_minutes);
        let period_secs = period.num_seconds();
        let ts = now.timestamp();
        let period_end = Utc
            .timestamp_opt(ts - ts.rem_euclid(period_secs), 0)
            .single()
            .ok_or_else(|| Error::Other(format!("cannot align {} to reconciliation period", now)))?;

        {
            let mut last = self.last_reconciled.lock();
            if last.map_or(false, |end| end >= period_end) {
                return Ok(Vec::new());
            }
            *last = Some(period_end);
        }

        let period_start = period_end - period;
        let mut reports = Vec::new();
        for rail in Rail::ALL.iter().copied().filter(|r| self.adapters.query(*r).is_ok()) {
            match self
                .reconciliation
                .run_reconciliation(None, rail, period_start, period_end)
                .await
            {
                Ok(run) => reports.push(run.report),
                Err(Error::ReconciliationInProgress { .. }) => {
                    warn!(rail = %rail, "Reconciliation already running, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(reports)
    }

    /// Run sweeps on an interval until `shutdown` flips to `true`
    pub fn start_scheduler(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let interval_secs = self.config.scheduler.sweep_interval_seconds;
        tokio::spawn(async move {
            info!(interval_secs, "Starting settlement sweep scheduler");
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match self.run_sweeps(Utc::now()).await {
                            Ok(report) => {
                                if report.retries.claimed > 0
                                    || report.drain.claimed > 0
                                    || !report.reconciliations.is_empty()
                                {
                                    info!(
                                        retries = report.retries.claimed,
                                        drained = report.drain.claimed,
                                        reconciliations = report.reconciliations.len(),
                                        "Sweep finished"
                                    );
                                }
                            }
                            Err(e) => error!("Sweep failed: {}", e),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Settlement sweep scheduler stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TracingEventSink;
    use crate::types::{Protocol, SettlementStatus, TenantId};
    use rust_decimal_macros::dec;

    fn engine() -> SettlementEngine {
        let (registry, _) = AdapterRegistry::with_mocks();
        SettlementEngine::in_memory(EngineConfig::default(), registry, Arc::new(TracingEventSink))
            .unwrap()
    }

    #[tokio::test]
    async fn test_realtime_settle_through_engine() {
        let engine = engine();
        let request = SettlementRequest::new(TenantId::new("acme"), Protocol::X402, dec!(25), "USDC");
        let response = engine.settle(request).await.unwrap();
        assert_eq!(response.rail, Rail::CircleUsdc);
        assert_eq!(response.status, SettlementStatus::Completed);
    }

    #[tokio::test]
    async fn test_reconciliation_sweep_runs_once_per_period() {
        let engine = engine();
        let now = Utc::now();

        let first = engine.reconcile_closed_period(now).await.unwrap();
        assert_eq!(first.len(), Rail::ALL.len());
        assert!(engine.reconcile_closed_period(now).await.unwrap().is_empty());

        let later = now + ChronoDuration::hours(1);
        assert_eq!(engine.reconcile_closed_period(later).await.unwrap().len(), Rail::ALL.len());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.scheduler.sweep_interval_seconds = 0;
        let (registry, _) = AdapterRegistry::with_mocks();
        assert!(SettlementEngine::in_memory(config, registry, Arc::new(TracingEventSink)).is_err());
    }

    #[tokio::test]
    async fn test_scheduler_stops_on_shutdown() {
        let engine = Arc::new(engine());
        let (tx, rx) = watch::channel(false);
        let handle = engine.start_scheduler(rx);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
