//! Metrics module for billing-service.
//! Provides Prometheus metrics for billing operations and per-company metering.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_counter_vec, register_histogram_vec, register_int_counter_vec,
    CounterVec, Encoder, HistogramVec, IntCounterVec, TextEncoder,
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

/// Subscription operations counter (per-company metering)
pub static SUBSCRIPTION_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Invoices issued, by source (subscribe, confirm, renewal)
pub static INVOICES_GENERATED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Invoiced amount (monetary tracking)
pub static INVOICE_AMOUNT_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Sweep runs by outcome
pub static SWEEPS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Subscriptions closed by the expiry pass
pub static SUBSCRIPTIONS_CLOSED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// HTTP request counter
pub static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// HTTP request duration histogram
pub static HTTP_REQUEST_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Safe to call more than once.
pub fn init_metrics() {
    SUBSCRIPTION_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_subscription_operations_total",
                "Total subscription operations by company and operation type"
            ),
            &["company_id", "operation"]
        )
        .expect("Failed to register SUBSCRIPTION_OPERATIONS_TOTAL")
    });

    INVOICES_GENERATED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_invoices_generated_total",
                "Total invoices generated by company and source"
            ),
            &["company_id", "source"]
        )
        .expect("Failed to register INVOICES_GENERATED_TOTAL")
    });

    INVOICE_AMOUNT_TOTAL.get_or_init(|| {
        register_counter_vec!(
            opts!(
                "billing_invoice_amount_total",
                "Total invoiced amount by company and source"
            ),
            &["company_id", "source"]
        )
        .expect("Failed to register INVOICE_AMOUNT_TOTAL")
    });

    SWEEPS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("billing_sweeps_total", "Total billing sweeps by outcome"),
            &["outcome"]
        )
        .expect("Failed to register SWEEPS_TOTAL")
    });

    SUBSCRIPTIONS_CLOSED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_subscriptions_closed_total",
                "Total subscriptions closed after their end date"
            ),
            &["company_id"]
        )
        .expect("Failed to register SUBSCRIPTIONS_CLOSED_TOTAL")
    });

    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("billing_http_requests_total", "Total HTTP requests"),
            &["method", "path", "status"]
        )
        .expect("Failed to register HTTP_REQUESTS_TOTAL")
    });

    HTTP_REQUEST_DURATION.get_or_init(|| {
        register_histogram_vec!(
            histogram_opts!(
                "billing_http_request_duration_seconds",
                "HTTP request duration",
                vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
            ),
            &["method", "path"]
        )
        .expect("Failed to register HTTP_REQUEST_DURATION")
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
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record a subscription operation.
pub fn record_subscription_operation(company_id: &str, operation: &str) {
    if let Some(counter) = SUBSCRIPTION_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[company_id, operation]).inc();
    }
}

/// Record an issued invoice and its amount.
pub fn record_invoice_generated(company_id: &str, source: &str, amount: f64) {
    if let Some(counter) = INVOICES_GENERATED_TOTAL.get() {
        counter.with_label_values(&[company_id, source]).inc();
    }
    if let Some(counter) = INVOICE_AMOUNT_TOTAL.get() {
        counter
            .with_label_values(&[company_id, source])
            .inc_by(amount.abs());
    }
}

/// Record a finished sweep.
pub fn record_sweep(outcome: &str) {
    if let Some(counter) = SWEEPS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Record a subscription closed by the expiry pass.
pub fn record_subscription_closed(company_id: &str) {
    if let Some(counter) = SUBSCRIPTIONS_CLOSED_TOTAL.get() {
        counter.with_label_values(&[company_id]).inc();
    }
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: &str, duration_secs: f64) {
    if let Some(counter) = HTTP_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[method, path, status]).inc();
    }
    if let Some(histogram) = HTTP_REQUEST_DURATION.get() {
        histogram
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, operation]).inc();
    }
}
