//! Prometheus metrics for the realtime service.
//!
//! - Connection metrics (open sockets, authenticated users, lifetimes)
//! - Event metrics (inbound events by name, malformed frames)
//! - Notification metrics (delivered by kind, dropped by reason)
//! - Heartbeat metrics

mod helpers;

pub use helpers::{
    encode_metrics, ConnectionMetrics, EventMetrics, HeartbeatMetrics, NotificationMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "samajik";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Open WebSocket connections (authenticated or not)
    pub static ref CONNECTIONS_TOTAL: IntGauge = register_int_gauge!(
        format!("{}_connections_total", METRIC_PREFIX),
        "Number of open WebSocket connections"
    ).unwrap();

    /// Users currently bound to a connection
    pub static ref USERS_AUTHENTICATED: IntGauge = register_int_gauge!(
        format!("{}_users_authenticated", METRIC_PREFIX),
        "Number of users bound to a live connection"
    ).unwrap();

    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection lifetime in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]
    ).unwrap();

    pub static ref STALE_CONNECTIONS_REMOVED: IntCounter = register_int_counter!(
        format!("{}_stale_connections_removed_total", METRIC_PREFIX),
        "Connections removed after exceeding the idle timeout"
    ).unwrap();

    // ============================================================================
    // Event Metrics
    // ============================================================================

    /// Inbound client events by name
    pub static ref EVENTS_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_events_received_total", METRIC_PREFIX),
        "Total client events received",
        &["event"]
    ).unwrap();

    pub static ref EVENTS_MALFORMED: IntCounter = register_int_counter!(
        format!("{}_events_malformed_total", METRIC_PREFIX),
        "Client events dropped because they could not be parsed or routed"
    ).unwrap();

    // ============================================================================
    // Notification Metrics
    // ============================================================================

    pub static ref NOTIFICATIONS_DELIVERED: IntCounterVec = register_int_counter_vec!(
        format!("{}_notifications_delivered_total", METRIC_PREFIX),
        "Notifications handed to a live connection",
        &["kind"]
    ).unwrap();

    /// Reasons: offline, self, buffer_full, closed
    pub static ref NOTIFICATIONS_DROPPED: IntCounterVec = register_int_counter_vec!(
        format!("{}_notifications_dropped_total", METRIC_PREFIX),
        "Notifications not delivered",
        &["reason"]
    ).unwrap();

    // ============================================================================
    // Heartbeat Metrics
    // ============================================================================

    pub static ref HEARTBEAT_DURATION_MS: Histogram = register_histogram!(
        format!("{}_heartbeat_duration_ms", METRIC_PREFIX),
        "Time to send one heartbeat round in milliseconds",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]
    ).unwrap();

    pub static ref HEARTBEAT_FAILURES: IntCounter = register_int_counter!(
        format!("{}_heartbeat_failures_total", METRIC_PREFIX),
        "Heartbeats that could not be queued for a connection"
    ).unwrap();
}
