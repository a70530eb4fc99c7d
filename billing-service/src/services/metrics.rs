//! Metrics module for billing-service.
//! Provides Prometheus metrics for billing operations and per-tenant metering.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "billing_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Charge attempts counter (per-tenant metering)
pub static CHARGE_ATTEMPTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Subscription operations counter (per-tenant metering)
pub static SUBSCRIPTION_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Sweep runs counter
pub static SWEEP_RUNS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Per-schedule sweep outcomes counter
pub static SWEEP_SCHEDULES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Webhook notifications counter
pub static WEBHOOK_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    CHARGE_ATTEMPTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_charge_attempts_total",
                "Total charge attempts by tenant, kind and outcome"
            ),
            &["tenant_id", "kind", "status"]
        )
        .expect("Failed to register CHARGE_ATTEMPTS_TOTAL")
    });

    SUBSCRIPTION_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_subscription_operations_total",
                "Total subscription operations by tenant and operation type"
            ),
            &["tenant_id", "operation"]
        )
        .expect("Failed to register SUBSCRIPTION_OPERATIONS_TOTAL")
    });

    SWEEP_RUNS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("billing_sweep_runs_total", "Total billing sweep runs"),
            &["status"]
        )
        .expect("Failed to register SWEEP_RUNS_TOTAL")
    });

    SWEEP_SCHEDULES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_sweep_schedules_total",
                "Schedules processed by sweeps, by outcome"
            ),
            &["outcome"]
        )
        .expect("Failed to register SWEEP_SCHEDULES_TOTAL")
    });

    WEBHOOK_EVENTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_webhook_events_total",
                "Webhook notifications by processing result"
            ),
            &["result"]
        )
        .expect("Failed to register WEBHOOK_EVENTS_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("billing_errors_total", "Total errors by type for alerting"),
            &["error_type", "operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to string")
}

/// Record a charge attempt.
pub fn record_charge_attempt(tenant_id: &str, kind: &str, status: &str) {
    if let Some(counter) = CHARGE_ATTEMPTS_TOTAL.get() {
        counter.with_label_values(&[tenant_id, kind, status]).inc();
    }
}

/// Record a subscription operation.
pub fn record_subscription_operation(tenant_id: &str, operation: &str) {
    if let Some(counter) = SUBSCRIPTION_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[tenant_id, operation]).inc();
    }
}

/// Record a sweep run.
pub fn record_sweep_run(status: &str) {
    if let Some(counter) = SWEEP_RUNS_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
}

/// Record a per-schedule sweep outcome.
pub fn record_sweep_schedule(outcome: &str) {
    if let Some(counter) = SWEEP_SCHEDULES_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Record a webhook processing result.
pub fn record_webhook_event(result: &str) {
    if let Some(counter) = WEBHOOK_EVENTS_TOTAL.get() {
        counter.with_label_values(&[result]).inc();
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, operation]).inc();
    }
}
