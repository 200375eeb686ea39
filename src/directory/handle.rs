//! Connection handle and delivery errors

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::websocket::ServerEvent;

/// Handle for a single live WebSocket connection.
///
/// The handle never carries the user identity; the binding between a user and
/// a connection lives in [`super::ConnectionDirectory`].
pub struct ConnectionHandle {
    pub id: Uuid,
    pub sender: mpsc::Sender<ServerEvent>,
    pub connected_at: DateTime<Utc>,
    /// Unix seconds, lock-free
    last_activity: AtomicI64,
    closed: Notify,
}

/// Why an outbound event could not be handed to the connection's writer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("outbound buffer full")]
    Full,
    #[error("connection closed")]
    Closed,
}

impl DeliveryError {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryError::Full => "buffer_full",
            DeliveryError::Closed => "closed",
        }
    }
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::Sender<ServerEvent>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            sender,
            connected_at: now,
            last_activity: AtomicI64::new(now.timestamp()),
            closed: Notify::new(),
        }
    }

    pub fn update_activity(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_activity.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }

    #[cfg(test)]
    pub(crate) fn set_last_activity(&self, at: DateTime<Utc>) {
        self.last_activity.store(at.timestamp(), Ordering::Relaxed);
    }

    /// Fire-and-forget delivery. Never waits on a slow client.
    pub fn deliver(&self, event: ServerEvent) -> Result<(), DeliveryError> {
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Ask the socket task owning this connection to shut down.
    pub fn close(&self) {
        self.closed.notify_one();
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        self.closed.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_deliver_reports_full_buffer() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(tx);

        assert!(handle.deliver(ServerEvent::Heartbeat).is_ok());
        assert_eq!(handle.deliver(ServerEvent::Pong), Err(DeliveryError::Full));

        assert!(matches!(rx.recv().await, Some(ServerEvent::Heartbeat)));
    }

    #[tokio::test]
    async fn test_deliver_reports_closed_receiver() {
        let (tx, rx) = mpsc::channel(4);
        let handle = ConnectionHandle::new(tx);
        drop(rx);

        assert_eq!(handle.deliver(ServerEvent::Pong), Err(DeliveryError::Closed));
    }

    #[tokio::test]
    async fn test_close_wakes_waiter() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(tx);

        // Permit is stored even if nobody is waiting yet
        handle.close();
        tokio::time::timeout(Duration::from_secs(1), handle.closed())
            .await
            .expect("closed() should resolve after close()");
    }

    #[test]
    fn test_activity_roundtrip() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(tx);
        let past = Utc::now() - chrono::Duration::seconds(300);

        handle.set_last_activity(past);
        assert_eq!(handle.last_activity().timestamp(), past.timestamp());

        handle.update_activity();
        assert!(handle.last_activity() > past);
    }
}
