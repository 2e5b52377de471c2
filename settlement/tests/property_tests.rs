//! Property-based tests for settlement invariants
//!
//! - Fee bounds: 0 <= fee <= amount, net = amount - fee
//! - Routing determinism: same inputs select the same rail
//! - Window monotonicity: next window is never before "now"
//! - Status monotonicity: terminal records never change status
//! - Backoff bounds: delays stay within [min, max] and never shrink

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use rail_settlement::{
    config::{RouterConfig, WindowSettings},
    router::{calculate_fee, RetryPolicy},
    window::{Holiday, WindowFrequency},
    AdapterRegistry, InMemoryStore, Operator, Protocol, Rail, RailCatalog, SettlementRecord,
    SettlementRequest, SettlementRouter, SettlementStatus, SettlementWindowManager, TenantId,
    TracingEventSink,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Strategy for amounts from 1e-8 up to 10 million
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..1_000_000_000_000_000i64).prop_map(|units| Decimal::new(units, 8))
}

fn rail_strategy() -> impl Strategy<Value = Rail> {
    proptest::sample::select(Rail::ALL.to_vec())
}

fn protocol_strategy() -> impl Strategy<Value = Protocol> {
    prop_oneof![
        Just(Protocol::X402),
        Just(Protocol::Ap2),
        Just(Protocol::Acp),
        Just(Protocol::Ucp),
        Just(Protocol::CrossBorder),
    ]
}

fn currency_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("USD"),
        Just("USDC"),
        Just("BRL"),
        Just("MXN"),
        Just("EUR"),
        Just("GBP"),
        Just("JPY"),
    ]
}

fn status_strategy() -> impl Strategy<Value = SettlementStatus> {
    prop_oneof![
        Just(SettlementStatus::Pending),
        Just(SettlementStatus::Processing),
        Just(SettlementStatus::Completed),
        Just(SettlementStatus::Failed),
    ]
}

fn router() -> SettlementRouter {
    let (registry, _) = AdapterRegistry::with_mocks();
    SettlementRouter::new(
        Arc::new(RailCatalog::default()),
        registry,
        Arc::new(InMemoryStore::new()),
        Arc::new(TracingEventSink),
        RouterConfig::default(),
    )
}

fn record() -> SettlementRecord {
    let request = SettlementRequest::new(TenantId::new("prop"), Protocol::Ucp, Decimal::ONE, "USD");
    let now = Utc::now();
    SettlementRecord {
        id: Uuid::new_v4(),
        transfer_id: request.transfer_id,
        tenant_id: request.tenant_id.clone(),
        rail: Rail::Ach,
        protocol: Protocol::Ucp,
        status: SettlementStatus::Pending,
        gross_amount: Decimal::ONE,
        fee_amount: Decimal::ZERO,
        net_amount: Decimal::ONE,
        currency: "USD".to_string(),
        external_settlement_id: None,
        submitted_at: None,
        settled_at: None,
        estimated_completion: None,
        retry_count: 0,
        max_retries: 3,
        next_retry_at: None,
        last_error: None,
        routing: None,
        request,
        reconciled_at: None,
        reconciliation_matched: None,
        created_at: now,
        updated_at: now,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_fee_within_amount(
        amount in amount_strategy(),
        rail in rail_strategy(),
        pct_bps in 0i64..2_000,
        fixed_cents in 0i64..10_000,
    ) {
        let catalog = RailCatalog::default();
        let mut descriptor = catalog.descriptor(rail).cloned().unwrap();

        let fees = calculate_fee(amount, &descriptor);
        prop_assert!(fees.fee >= Decimal::ZERO);
        prop_assert!(fees.fee <= amount);
        prop_assert_eq!(fees.net, amount - fees.fee);

        descriptor.fee_percentage = Decimal::new(pct_bps, 4);
        descriptor.fee_fixed = Decimal::new(fixed_cents, 2);
        let fees = calculate_fee(amount, &descriptor);
        prop_assert!(fees.fee >= Decimal::ZERO);
        prop_assert!(fees.fee <= amount);
        prop_assert!(fees.net >= Decimal::ZERO);
    }

    #[test]
    fn prop_routing_is_deterministic(
        protocol in protocol_strategy(),
        currency in currency_strategy(),
        amount in amount_strategy(),
    ) {
        let request = SettlementRequest::new(TenantId::new("prop"), protocol, amount, currency);
        let first = router().route(&request);
        let second = router().route(&request);

        match (first, second) {
            (Ok(a), Ok(b)) => {
                prop_assert_eq!(a.selected_rail, b.selected_rail);
                prop_assert_eq!(a.alternatives, b.alternatives);
                prop_assert!(a.rail.admits(amount));
            }
            (Err(a), Err(b)) => prop_assert_eq!(a.code(), b.code()),
            (a, b) => prop_assert!(false, "diverging outcomes: {:?} vs {:?}", a.is_ok(), b.is_ok()),
        }
    }

    #[test]
    fn prop_next_window_not_before_now(
        rail in rail_strategy(),
        offset_minutes in 0i64..(3 * 365 * 24 * 60),
        holiday_today in any::<bool>(),
    ) {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(offset_minutes);
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

        let info = rt.block_on(async {
            let windows = SettlementWindowManager::new(Arc::new(InMemoryStore::new()), WindowSettings::default());
            if holiday_today {
                if let Some(country) = RailCatalog::holiday_country(rail) {
                    let config = windows.get_config(&TenantId::new("prop"), rail).await.unwrap();
                    let tz: chrono_tz::Tz = config.timezone.parse().unwrap();
                    let local_date = now.with_timezone(&tz).date_naive();
                    windows
                        .add_holiday(Holiday::new(country, local_date, "Prop Day"), &Operator::admin("prop"))
                        .await
                        .unwrap();
                }
            }
            windows.next_window(&TenantId::new("prop"), rail, now).await.unwrap()
        });

        prop_assert!(info.next_window_at >= now);
        let gated = holiday_today
            && RailCatalog::holiday_country(rail).is_some()
            && info.frequency != WindowFrequency::Realtime;
        if gated {
            prop_assert!(!info.is_open_now);
        }
    }

    #[test]
    fn prop_terminal_status_is_final(steps in proptest::collection::vec(status_strategy(), 1..12)) {
        let mut rec = record();
        let mut terminal: Option<SettlementStatus> = None;

        for next in steps {
            let before = rec.status;
            let result = rec.transition(next);
            if let Some(t) = terminal {
                prop_assert!(result.is_err());
                prop_assert_eq!(rec.status, t);
            }
            if before == SettlementStatus::Processing && next == SettlementStatus::Pending {
                prop_assert!(result.is_err());
            }
            if rec.status.is_terminal() {
                terminal = Some(rec.status);
            }
        }
    }

    #[test]
    fn prop_backoff_bounded_and_monotonic(min in 1u64..30, retries in 0u32..64) {
        let policy = RetryPolicy::from_config(&RouterConfig {
            min_backoff_seconds: min,
            ..RouterConfig::default()
        });
        let delay = policy.backoff(retries);
        prop_assert!(delay >= Duration::seconds(min as i64));
        prop_assert!(delay <= Duration::seconds(3600));
        prop_assert!(policy.backoff(retries + 1) >= delay);
    }
}
