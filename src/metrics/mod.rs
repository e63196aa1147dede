//! Prometheus metrics for the push delivery service.
//!
//! Covers the delivery pipeline end-to-end:
//! - Token lifecycle (registrations, invalidations)
//! - Dispatch outcomes and retries
//! - Campaign terminal states

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "beacon";

lazy_static! {
    // ============================================================================
    // Token Metrics
    // ============================================================================

    /// Tokens successfully registered and validated, by platform
    pub static ref TOKENS_REGISTERED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_tokens_registered_total", METRIC_PREFIX),
        "Tokens successfully registered and validated",
        &["platform"]
    ).unwrap();

    /// Tokens marked invalid (gateway rejection, supersede or explicit unregister)
    pub static ref TOKENS_INVALIDATED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_tokens_invalidated_total", METRIC_PREFIX),
        "Tokens marked invalid"
    ).unwrap();

    // ============================================================================
    // Dispatch Metrics
    // ============================================================================

    /// Terminal dispatch outcomes persisted to the ledger
    pub static ref DISPATCH_OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_dispatch_outcomes_total", METRIC_PREFIX),
        "Terminal dispatch outcomes",
        &["outcome"]
    ).unwrap();

    /// Retries scheduled after transient gateway failures
    pub static ref DISPATCH_RETRIES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_dispatch_retries_total", METRIC_PREFIX),
        "Retries scheduled after transient gateway failures"
    ).unwrap();

    /// Gateway calls that exceeded the configured timeout
    pub static ref GATEWAY_TIMEOUTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_gateway_timeouts_total", METRIC_PREFIX),
        "Gateway calls that exceeded the configured timeout"
    ).unwrap();

    // ============================================================================
    // Campaign Metrics
    // ============================================================================

    /// Campaigns created in DRAFT state
    pub static ref CAMPAIGNS_CREATED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_campaigns_created_total", METRIC_PREFIX),
        "Campaigns created"
    ).unwrap();

    /// Campaigns reaching a terminal state, by status
    pub static ref CAMPAIGNS_FINISHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_campaigns_finished_total", METRIC_PREFIX),
        "Campaigns reaching a terminal state",
        &["status"]
    ).unwrap();
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}
