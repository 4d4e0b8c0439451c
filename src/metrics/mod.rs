//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Prepare cycles (started, discarded as stale, failed by category)
//! - Metadata cache effectiveness
//! - Remote calls by capability
//! - Submissions and their confirmation outcome

use crate::error::ErrorCategory;

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    // Prepare metrics
    pub static ref PREPARES_STARTED: CounterVec = register_counter_vec!(
        "transfer_prepares_started_total",
        "Total prepare cycles started after input settled",
        &[]
    ).unwrap();

    pub static ref PREPARES_STALE: CounterVec = register_counter_vec!(
        "transfer_prepares_stale_total",
        "Prepare results discarded because newer input superseded them",
        &[]
    ).unwrap();

    pub static ref PIPELINE_ERRORS: CounterVec = register_counter_vec!(
        "transfer_pipeline_errors_total",
        "Errors surfaced to the host by category",
        &["category"]
    ).unwrap();

    // Metadata metrics
    pub static ref METADATA_LOOKUPS: CounterVec = register_counter_vec!(
        "transfer_metadata_lookups_total",
        "Token metadata lookups by cache outcome",
        &["outcome"]
    ).unwrap();

    // Remote metrics
    pub static ref REMOTE_CALLS: CounterVec = register_counter_vec!(
        "transfer_remote_calls_total",
        "Remote ledger calls by capability",
        &["operation"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "transfer_transactions_submitted_total",
        "Total transactions broadcast",
        &[]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "transfer_transactions_confirmed_total",
        "Total transactions included successfully",
        &[]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "transfer_transactions_failed_total",
        "Total transactions that reverted or were never confirmed",
        &[]
    ).unwrap();

    pub static ref TX_CONFIRMATION_LATENCY: HistogramVec = register_histogram_vec!(
        "transfer_confirmation_latency_seconds",
        "Time from broadcast to a terminal receipt",
        &[],
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    ).unwrap();
}

/// Render all registered metrics in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_prepare_started() {
    PREPARES_STARTED.with_label_values(&[]).inc();
}

pub fn record_prepare_stale() {
    PREPARES_STALE.with_label_values(&[]).inc();
}

pub fn record_error(category: ErrorCategory) {
    PIPELINE_ERRORS
        .with_label_values(&[category.as_str()])
        .inc();
}

pub fn record_metadata_lookup(hit: bool) {
    METADATA_LOOKUPS
        .with_label_values(&[if hit { "hit" } else { "miss" }])
        .inc();
}

pub fn record_remote_call(operation: &str) {
    REMOTE_CALLS.with_label_values(&[operation]).inc();
}

pub fn record_tx_submitted() {
    TX_SUBMITTED.with_label_values(&[]).inc();
}

pub fn record_tx_confirmed(latency_secs: f64) {
    TX_CONFIRMED.with_label_values(&[]).inc();
    TX_CONFIRMATION_LATENCY
        .with_label_values(&[])
        .observe(latency_secs);
}

pub fn record_tx_failed() {
    TX_FAILED.with_label_values(&[]).inc();
}
