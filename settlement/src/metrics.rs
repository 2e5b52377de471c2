//! Settlement metrics

use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge_vec, CounterVec,
    HistogramVec, IntGaugeVec,
};

lazy_static::lazy_static! {
    pub static ref SETTLEMENTS_TOTAL: CounterVec = register_counter_vec!(
        "rail_settlements_total",
        "Settlement attempts by outcome",
        &["rail", "status"]
    )
    .unwrap();

    pub static ref ROUTING_DURATION: HistogramVec = register_histogram_vec!(
        "rail_routing_duration_seconds",
        "Time spent selecting a rail",
        &["protocol"]
    )
    .unwrap();

    pub static ref RETRIES_SCHEDULED: CounterVec = register_counter_vec!(
        "rail_retries_scheduled_total",
        "Retries booked after transient failures",
        &["rail"]
    )
    .unwrap();

    pub static ref QUEUE_DEPTH: IntGaugeVec = register_int_gauge_vec!(
        "rail_window_queue_depth",
        "Transfers waiting for a settlement window",
        &["rail"]
    )
    .unwrap();

    pub static ref RECONCILIATION_RUNS: CounterVec = register_counter_vec!(
        "rail_reconciliation_runs_total",
        "Reconciliation runs by outcome",
        &["rail", "status"]
    )
    .unwrap();

    pub static ref DISCREPANCIES_TOTAL: CounterVec = register_counter_vec!(
        "rail_reconciliation_discrepancies_total",
        "Discrepancies detected",
        &["rail", "type", "severity"]
    )
    .unwrap();
}
