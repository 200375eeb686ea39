//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use crate::directory::DirectoryStats;

use super::{
    CONNECTIONS_TOTAL, EVENTS_MALFORMED, EVENTS_RECEIVED, HEARTBEAT_DURATION_MS,
    HEARTBEAT_FAILURES, NOTIFICATIONS_DELIVERED, NOTIFICATIONS_DROPPED, STALE_CONNECTIONS_REMOVED,
    USERS_AUTHENTICATED, WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_OPENED, WS_CONNECTION_DURATION,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        WS_CONNECTIONS_OPENED.inc();
    }

    pub fn record_closed(duration_secs: f64) {
        WS_CONNECTIONS_CLOSED.inc();
        WS_CONNECTION_DURATION.observe(duration_secs);
    }

    pub fn record_stale_removed(count: u64) {
        STALE_CONNECTIONS_REMOVED.inc_by(count);
    }

    /// Refresh gauges from a directory snapshot
    pub fn set_from_stats(stats: &DirectoryStats) {
        CONNECTIONS_TOTAL.set(stats.total_connections as i64);
        USERS_AUTHENTICATED.set(stats.authenticated_users as i64);
    }
}

pub struct EventMetrics;

impl EventMetrics {
    pub fn record_received(event: &str) {
        EVENTS_RECEIVED.with_label_values(&[event]).inc();
    }

    pub fn record_malformed() {
        EVENTS_MALFORMED.inc();
    }
}

pub struct NotificationMetrics;

impl NotificationMetrics {
    pub fn record_delivered(kind: &str) {
        NOTIFICATIONS_DELIVERED.with_label_values(&[kind]).inc();
    }

    pub fn record_dropped(reason: &str) {
        NOTIFICATIONS_DROPPED.with_label_values(&[reason]).inc();
    }
}

pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    pub fn record_duration_ms(ms: u64) {
        HEARTBEAT_DURATION_MS.observe(ms as f64);
    }

    pub fn record_failures(count: u64) {
        HEARTBEAT_FAILURES.inc_by(count);
    }
}
