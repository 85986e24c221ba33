//! Prometheus metrics for the notification pipeline.
//!
//! Counters cover the three stages of the pipeline:
//! - Consumer metrics (events consumed, requeued, dead-lettered)
//! - Dispatch metrics (notifications sent/failed by channel)
//! - Email metrics (messages handed to the mail transport)
//!
//! The metrics live in the default registry; exposing them over HTTP is
//! left to the embedding application.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec,
    IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "courier";

lazy_static! {
    // ============================================================================
    // Consumer Metrics
    // ============================================================================

    /// Total events read from the broker stream
    pub static ref EVENTS_CONSUMED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_events_consumed_total", METRIC_PREFIX),
        "Total events read from the broker stream"
    ).unwrap();

    /// Total events requeued after a processing or decode failure
    pub static ref EVENTS_REQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_events_requeued_total", METRIC_PREFIX),
        "Total events requeued for another delivery attempt"
    ).unwrap();

    /// Total events moved to the dead-letter stream
    pub static ref EVENTS_DEAD_LETTERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_events_dead_lettered_total", METRIC_PREFIX),
        "Total events moved to the dead-letter stream after exhausting deliveries"
    ).unwrap();

    // ============================================================================
    // Dispatch Metrics
    // ============================================================================

    /// Notifications dispatched successfully, by channel
    pub static ref NOTIFICATIONS_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_notifications_sent_total", METRIC_PREFIX),
        "Notifications dispatched successfully",
        &["channel"]
    ).unwrap();

    /// Notifications that failed dispatch, by channel
    pub static ref NOTIFICATIONS_FAILED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_notifications_failed_total", METRIC_PREFIX),
        "Notifications that failed dispatch",
        &["channel"]
    ).unwrap();

    /// Current depth of the worker pool job queue
    pub static ref JOB_QUEUE_DEPTH: IntGauge = register_int_gauge!(
        format!("{}_job_queue_depth", METRIC_PREFIX),
        "Current number of notifications waiting in the worker pool queue"
    ).unwrap();

    // ============================================================================
    // Email Metrics
    // ============================================================================

    /// Emails accepted by the mail transport
    pub static ref EMAILS_SENT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_emails_sent_total", METRIC_PREFIX),
        "Emails accepted by the mail transport"
    ).unwrap();

    /// Email sends rejected by the mail transport or timed out
    pub static ref EMAILS_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_emails_failed_total", METRIC_PREFIX),
        "Email sends rejected by the mail transport or timed out"
    ).unwrap();
}
