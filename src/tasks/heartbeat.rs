use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::config::WebSocketConfig;
use crate::directory::ConnectionDirectory;
use crate::metrics::{ConnectionMetrics, HeartbeatMetrics};
use crate::websocket::ServerEvent;

/// Background task for heartbeat and idle connection cleanup
pub struct HeartbeatTask {
    config: WebSocketConfig,
    directory: Arc<ConnectionDirectory>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: WebSocketConfig,
        directory: Arc<ConnectionDirectory>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            directory,
            shutdown,
        }
    }

    /// Run the heartbeat and cleanup loops until shutdown
    pub async fn run(mut self) {
        let heartbeat_interval = Duration::from_secs(self.config.heartbeat_interval);
        let cleanup_interval = Duration::from_secs(self.config.cleanup_interval);
        let connection_timeout = self.config.connection_timeout;

        let mut heartbeat_timer = tokio::time::interval(heartbeat_interval);
        let mut cleanup_timer = tokio::time::interval(cleanup_interval);

        // Skip immediate first tick
        heartbeat_timer.tick().await;
        cleanup_timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval,
            cleanup_interval_secs = self.config.cleanup_interval,
            connection_timeout_secs = connection_timeout,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = heartbeat_timer.tick() => {
                    self.send_heartbeats();
                }
                _ = cleanup_timer.tick() => {
                    self.cleanup_stale_connections(connection_timeout);
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    /// Queue a heartbeat on every connection. Full buffers are skipped, not awaited.
    fn send_heartbeats(&self) {
        let connections = self.directory.all_connections();
        if connections.is_empty() {
            return;
        }

        let start = Instant::now();
        let mut sent = 0usize;
        let mut failed = 0usize;

        for handle in &connections {
            match handle.deliver(ServerEvent::Heartbeat) {
                Ok(()) => sent += 1,
                Err(e) => {
                    failed += 1;
                    tracing::debug!(
                        connection_id = %handle.id,
                        error = %e,
                        "Failed to queue heartbeat, connection may be dead"
                    );
                }
            }
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        HeartbeatMetrics::record_duration_ms(elapsed_ms);
        if failed > 0 {
            HeartbeatMetrics::record_failures(failed as u64);
        }
        ConnectionMetrics::set_from_stats(&self.directory.stats());

        tracing::debug!(
            total = connections.len(),
            sent = sent,
            failed = failed,
            elapsed_ms = elapsed_ms,
            "Heartbeat round completed"
        );
    }

    fn cleanup_stale_connections(&self, timeout_secs: u64) {
        let removed = self.directory.cleanup_stale(timeout_secs);

        if removed > 0 {
            ConnectionMetrics::record_stale_removed(removed as u64);
            tracing::info!(
                removed = removed,
                timeout_secs = timeout_secs,
                "Cleaned up stale connections"
            );
        }
    }
}
