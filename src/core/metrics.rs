// src/core/metrics.rs

//! Defines and registers Prometheus metrics for server monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, GaugeVec, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge_vec, register_histogram,
};

lazy_static! {
    // --- Connection Gauges ---
    /// The number of clients currently connected, labeled by role.
    pub static ref CONNECTED_CLIENTS: GaugeVec =
        register_gauge_vec!("slipstream_connected_clients", "Number of currently connected clients, labeled by role.", &["role"]).unwrap();


    // --- Connection Counters ---
    /// The total number of WebSocket sessions accepted since startup.
    pub static ref CONNECTIONS_ACCEPTED_TOTAL: Counter =
        register_counter!("slipstream_connections_accepted_total", "Total number of connections accepted.").unwrap();
    /// The total number of student sessions replaced by a newer session for the same identity.
    pub static ref CONNECTIONS_EVICTED_TOTAL: Counter =
        register_counter!("slipstream_connections_evicted_total", "Total number of connections evicted by a reconnect.").unwrap();


    // --- Delivery Counters ---
    /// Messages accepted into an outbound queue, labeled by envelope type.
    pub static ref MESSAGES_ENQUEUED_TOTAL: CounterVec =
        register_counter_vec!("slipstream_messages_enqueued_total", "Total number of messages enqueued, labeled by kind.", &["kind"]).unwrap();
    /// Messages that were not delivered, labeled by reason.
    pub static ref MESSAGES_DROPPED_TOTAL: CounterVec =
        register_counter_vec!("slipstream_messages_dropped_total", "Total number of messages dropped, labeled by reason.", &["reason"]).unwrap();


    // --- Reminder Counters ---
    /// Notifier ticks, labeled by outcome (`ok` or `store_error`).
    pub static ref REMINDER_SCANS_TOTAL: CounterVec =
        register_counter_vec!("slipstream_reminder_scans_total", "Total number of reminder scans, labeled by outcome.", &["outcome"]).unwrap();
    /// Individual class reminders, labeled by outcome (`delivered` or `not_delivered`).
    pub static ref REMINDERS_TOTAL: CounterVec =
        register_counter_vec!("slipstream_reminders_total", "Total number of class reminders, labeled by outcome.", &["outcome"]).unwrap();
    /// Schedule records skipped because a required field was missing or malformed.
    pub static ref INVALID_SCHEDULE_RECORDS_TOTAL: Counter =
        register_counter!("slipstream_invalid_schedule_records_total", "Total number of schedule records skipped as invalid.").unwrap();


    // --- Histograms ---
    /// A histogram of reminder scan durations.
    pub static ref REMINDER_SCAN_SECONDS: Histogram =
        register_histogram!("slipstream_reminder_scan_seconds", "Duration of a reminder scan in seconds.").unwrap();
}

/// Reasons a message can fail to reach an outbound queue.
pub mod drop_reason {
    pub const QUEUE_FULL: &str = "queue_full";
    pub const NOT_CONNECTED: &str = "not_connected";
    pub const CLOSED: &str = "closed";
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
