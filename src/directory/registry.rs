use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::websocket::ServerEvent;

use super::ConnectionHandle;

/// The user binding owned by the directory: which connection a user is
/// currently reachable on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub user_id: String,
    pub connection_id: Uuid,
    pub authenticated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryStats {
    pub total_connections: usize,
    pub authenticated_users: usize,
}

/// In-memory directory of live connections.
///
/// Every open socket is tracked (so broadcasts reach unauthenticated clients
/// too), and each user id is bound to at most one connection. A newer
/// `authenticate` replaces the binding; `disconnect` only releases a binding
/// that still points at the disconnecting connection.
pub struct ConnectionDirectory {
    /// connection_id -> ConnectionHandle
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
    /// user_id -> current binding
    users: DashMap<String, DirectoryEntry>,
    /// connection_id -> user_id it asserted
    bindings: DashMap<Uuid, String>,
}

impl ConnectionDirectory {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            users: DashMap::new(),
            bindings: DashMap::new(),
        }
    }

    /// Register a freshly opened, not yet authenticated connection
    pub fn open(&self, sender: mpsc::Sender<ServerEvent>) -> Arc<ConnectionHandle> {
        let handle = Arc::new(ConnectionHandle::new(sender));
        self.connections.insert(handle.id, handle.clone());

        tracing::debug!(connection_id = %handle.id, "Connection opened");

        handle
    }

    /// Bind `user_id` to `connection_id`, replacing any previous binding for
    /// that user. Returns false when the id is blank or the connection is gone.
    pub fn authenticate(&self, user_id: &str, connection_id: Uuid) -> bool {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            tracing::debug!(connection_id = %connection_id, "Ignoring authenticate with empty user id");
            return false;
        }

        if !self.connections.contains_key(&connection_id) {
            tracing::debug!(connection_id = %connection_id, "Ignoring authenticate for closed connection");
            return false;
        }

        // Same socket re-asserting a different identity releases the old one
        if let Some(previous) = self.bindings.insert(connection_id, user_id.to_string()) {
            if previous != user_id {
                self.users
                    .remove_if(&previous, |_, entry| entry.connection_id == connection_id);
            }
        }

        let entry = DirectoryEntry {
            user_id: user_id.to_string(),
            connection_id,
            authenticated_at: Utc::now(),
        };

        match self.users.insert(user_id.to_string(), entry) {
            Some(replaced) if replaced.connection_id != connection_id => {
                // The replaced socket no longer speaks for this user
                self.bindings
                    .remove_if(&replaced.connection_id, |_, bound| bound == user_id);
                tracing::info!(
                    user_id = %user_id,
                    connection_id = %connection_id,
                    replaced_connection_id = %replaced.connection_id,
                    "User re-authenticated on a new connection"
                );
            }
            _ => {
                tracing::info!(user_id = %user_id, connection_id = %connection_id, "User authenticated");
            }
        }

        // Lost a race with disconnect: drop the binding we just wrote
        if !self.connections.contains_key(&connection_id) {
            self.bindings.remove(&connection_id);
            self.users
                .remove_if(user_id, |_, entry| entry.connection_id == connection_id);
            return false;
        }

        true
    }

    /// Remove a connection. The user binding is released only when it still
    /// points at this connection; a stale disconnect after a reconnect leaves
    /// the newer binding alone. Returns the released binding, if any.
    pub fn disconnect(&self, connection_id: Uuid) -> Option<DirectoryEntry> {
        let removed = self.connections.remove(&connection_id).is_some();

        let released = self
            .bindings
            .remove(&connection_id)
            .and_then(|(_, user_id)| {
                let evicted = self
                    .users
                    .remove_if(&user_id, |_, entry| entry.connection_id == connection_id)
                    .map(|(_, entry)| entry);

                if evicted.is_none() {
                    tracing::debug!(
                        connection_id = %connection_id,
                        user_id = %user_id,
                        "Stale disconnect, user already bound to a newer connection"
                    );
                }
                evicted
            });

        if removed {
            tracing::info!(
                connection_id = %connection_id,
                user_id = ?released.as_ref().map(|e| e.user_id.as_str()),
                "Connection removed from directory"
            );
        }

        released
    }

    /// The connection a user is currently reachable on
    pub fn lookup(&self, user_id: &str) -> Option<Arc<ConnectionHandle>> {
        let connection_id = self.users.get(user_id).map(|e| e.connection_id)?;
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    pub fn entry(&self, user_id: &str) -> Option<DirectoryEntry> {
        self.users.get(user_id).map(|e| e.clone())
    }

    /// The user id a connection asserted, if it authenticated
    pub fn user_of(&self, connection_id: Uuid) -> Option<String> {
        self.bindings.get(&connection_id).map(|u| u.clone())
    }

    pub fn get_connection(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    pub fn all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    /// Every live connection except `connection_id` (broadcast targets)
    pub fn connections_except(&self, connection_id: Uuid) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .iter()
            .filter(|r| *r.key() != connection_id)
            .map(|r| r.value().clone())
            .collect()
    }

    pub fn touch(&self, connection_id: Uuid) {
        if let Some(handle) = self.connections.get(&connection_id) {
            handle.update_activity();
        }
    }

    pub fn stats(&self) -> DirectoryStats {
        DirectoryStats {
            total_connections: self.connections.len(),
            authenticated_users: self.users.len(),
        }
    }

    /// Connections idle for longer than `timeout_secs`
    pub fn stale_connections(&self, timeout_secs: u64) -> Vec<Uuid> {
        let now = Utc::now();
        let timeout = chrono::Duration::seconds(timeout_secs as i64);

        self.connections
            .iter()
            .filter(|r| now.signed_duration_since(r.value().last_activity()) > timeout)
            .map(|r| *r.key())
            .collect()
    }

    /// Remove and close idle connections, returning how many were removed
    pub fn cleanup_stale(&self, timeout_secs: u64) -> usize {
        let stale = self.stale_connections(timeout_secs);
        let mut count = 0;

        for connection_id in stale {
            let handle = self.get_connection(connection_id);
            tracing::info!(connection_id = %connection_id, "Removing stale connection due to timeout");
            self.disconnect(connection_id);
            if let Some(handle) = handle {
                handle.close();
                count += 1;
            }
        }

        count
    }
}

impl Default for ConnectionDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(directory: &ConnectionDirectory) -> (Arc<ConnectionHandle>, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(8);
        (directory.open(tx), rx)
    }

    #[test]
    fn test_authenticate_and_lookup() {
        let directory = ConnectionDirectory::new();
        let (h, _rx) = open(&directory);

        assert!(directory.authenticate("user-a", h.id));
        assert_eq!(directory.lookup("user-a").unwrap().id, h.id);
        assert_eq!(directory.user_of(h.id).as_deref(), Some("user-a"));
        assert!(directory.lookup("user-b").is_none());
    }

    #[test]
    fn test_blank_user_id_ignored() {
        let directory = ConnectionDirectory::new();
        let (h, _rx) = open(&directory);

        assert!(!directory.authenticate("", h.id));
        assert!(!directory.authenticate("   ", h.id));
        assert_eq!(directory.stats().authenticated_users, 0);
        assert!(directory.user_of(h.id).is_none());
    }

    #[test]
    fn test_authenticate_unknown_connection_ignored() {
        let directory = ConnectionDirectory::new();
        assert!(!directory.authenticate("user-a", Uuid::new_v4()));
        assert!(directory.lookup("user-a").is_none());
    }

    #[test]
    fn test_last_authenticate_wins() {
        let directory = ConnectionDirectory::new();
        let (h1, _rx1) = open(&directory);
        let (h2, _rx2) = open(&directory);

        directory.authenticate("user-a", h1.id);
        directory.authenticate("user-a", h2.id);

        assert_eq!(directory.lookup("user-a").unwrap().id, h2.id);
        assert_eq!(directory.stats().authenticated_users, 1);
        assert_eq!(directory.stats().total_connections, 2);
    }

    #[test]
    fn test_replaced_connection_loses_its_identity() {
        let directory = ConnectionDirectory::new();
        let (h1, _rx1) = open(&directory);
        let (h2, _rx2) = open(&directory);

        directory.authenticate("user-a", h1.id);
        directory.authenticate("user-a", h2.id);

        assert!(directory.user_of(h1.id).is_none());
        assert_eq!(directory.user_of(h2.id).as_deref(), Some("user-a"));

        // The old socket can still authenticate as someone else
        assert!(directory.authenticate("user-b", h1.id));
        assert_eq!(directory.lookup("user-a").unwrap().id, h2.id);
        assert_eq!(directory.lookup("user-b").unwrap().id, h1.id);
    }

    #[test]
    fn test_stale_disconnect_keeps_newer_binding() {
        let directory = ConnectionDirectory::new();
        let (h1, _rx1) = open(&directory);
        let (h2, _rx2) = open(&directory);

        directory.authenticate("user-a", h1.id);
        directory.authenticate("user-a", h2.id);

        assert!(directory.disconnect(h1.id).is_none());
        assert_eq!(directory.lookup("user-a").unwrap().id, h2.id);

        let released = directory.disconnect(h2.id).unwrap();
        assert_eq!(released.user_id, "user-a");
        assert_eq!(released.connection_id, h2.id);
        assert!(directory.lookup("user-a").is_none());
    }

    #[test]
    fn test_reauthenticate_as_other_user_releases_old_binding() {
        let directory = ConnectionDirectory::new();
        let (h, _rx) = open(&directory);

        directory.authenticate("user-a", h.id);
        directory.authenticate("user-b", h.id);

        assert!(directory.lookup("user-a").is_none());
        assert_eq!(directory.lookup("user-b").unwrap().id, h.id);
    }

    #[test]
    fn test_disconnect_unauthenticated() {
        let directory = ConnectionDirectory::new();
        let (h, _rx) = open(&directory);

        assert!(directory.disconnect(h.id).is_none());
        assert_eq!(directory.stats().total_connections, 0);
        // Idempotent
        assert!(directory.disconnect(h.id).is_none());
    }

    #[test]
    fn test_connections_except() {
        let directory = ConnectionDirectory::new();
        let (h1, _rx1) = open(&directory);
        let (h2, _rx2) = open(&directory);
        let (h3, _rx3) = open(&directory);

        let mut others: Vec<Uuid> = directory
            .connections_except(h1.id)
            .iter()
            .map(|h| h.id)
            .collect();
        others.sort();
        let mut expected = vec![h2.id, h3.id];
        expected.sort();

        assert_eq!(others, expected);
    }

    #[tokio::test]
    async fn test_cleanup_stale_closes_and_unbinds() {
        let directory = ConnectionDirectory::new();
        let (old, _rx1) = open(&directory);
        let (fresh, _rx2) = open(&directory);

        directory.authenticate("idle-user", old.id);
        directory.authenticate("active-user", fresh.id);
        old.set_last_activity(Utc::now() - chrono::Duration::seconds(600));

        assert_eq!(directory.stale_connections(60), vec![old.id]);
        assert_eq!(directory.cleanup_stale(60), 1);

        assert!(directory.lookup("idle-user").is_none());
        assert!(directory.lookup("active-user").is_some());

        tokio::time::timeout(std::time::Duration::from_secs(1), old.closed())
            .await
            .expect("stale connection should be told to close");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reconnect_and_disconnect() {
        const TASKS: usize = 32;
        let directory = Arc::new(ConnectionDirectory::new());
        let barrier = Arc::new(tokio::sync::Barrier::new(TASKS));
        let mut tasks = Vec::new();

        for i in 0..TASKS {
            let directory = directory.clone();
            let barrier = barrier.clone();
            tasks.push(tokio::spawn(async move {
                let (tx, _rx) = mpsc::channel(1);
                let user = format!("user-{}", i % 4);
                let h1 = directory.open(tx.clone());
                directory.authenticate(&user, h1.id);

                // Every task has a live binding before any of them reconnects
                barrier.wait().await;

                let h2 = directory.open(tx);
                directory.authenticate(&user, h2.id);
                tokio::task::yield_now().await;
                directory.disconnect(h1.id);
                h2.id
            }));
        }

        let mut survivors = Vec::new();
        for task in tasks {
            survivors.push(task.await.unwrap());
        }

        // Every user still resolves to one of the surviving connections
        for i in 0..4 {
            let handle = directory.lookup(&format!("user-{}", i)).unwrap();
            assert!(survivors.contains(&handle.id));
            assert_eq!(directory.user_of(handle.id), Some(format!("user-{}", i)));
        }
        assert_eq!(directory.stats().total_connections, TASKS);
        assert_eq!(directory.stats().authenticated_users, 4);
    }
}
