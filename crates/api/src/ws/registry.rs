//! In-memory registry of connected delegates.
//!
//! One slot per `{account, delegate}` pair, created when the stream
//! connects and destroyed when it closes. The registry is the only view
//! of the fleet this replica trusts: it is never persisted, and other
//! replicas maintain their own.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::ws::Message;
use relay_core::types::Timestamp;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};

/// Channel sender half for pushing messages to a delegate connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// A live delegate connection slot.
pub struct DelegateConnection {
    pub account_id: String,
    pub delegate_id: String,
    /// Capability tags advertised by the delegate's self-registration.
    pub capabilities: Vec<String>,
    /// Disabled delegates keep their stream but receive no work.
    pub enabled: bool,
    pub connected_at: Timestamp,
    pub last_heartbeat_at: Timestamp,
    /// Channel sender for outbound messages to this connection.
    pub sender: WsSender,
}

/// Sender-free view of a connection, safe to serialize into responses.
#[derive(Debug, Clone, Serialize)]
pub struct DelegateSnapshot {
    pub account_id: String,
    pub delegate_id: String,
    pub capabilities: Vec<String>,
    pub enabled: bool,
    pub connected_at: Timestamp,
    pub last_heartbeat_at: Timestamp,
}

impl DelegateConnection {
    fn snapshot(&self) -> DelegateSnapshot {
        DelegateSnapshot {
            account_id: self.account_id.clone(),
            delegate_id: self.delegate_id.clone(),
            capabilities: self.capabilities.clone(),
            enabled: self.enabled,
            connected_at: self.connected_at,
            last_heartbeat_at: self.last_heartbeat_at,
        }
    }
}

/// Slot key: one connection per `{account, delegate}` pair.
fn slot_key(account_id: &str, delegate_id: &str) -> String {
    format!("{account_id}/{delegate_id}")
}

/// Manages all delegate connections of this manager process.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc`
/// and shared across the application. Tests construct fresh instances.
pub struct DelegateRegistry {
    connections: RwLock<HashMap<String, DelegateConnection>>,
}

impl DelegateRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection slot for a delegate.
    ///
    /// Returns the receiver half of the outbound message channel. A
    /// reconnect under the same `{account, delegate}` replaces the
    /// previous slot; the stale sender is dropped and its receive loop
    /// winds down on its own.
    pub async fn add(
        &self,
        account_id: &str,
        delegate_id: &str,
        now: Timestamp,
    ) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = DelegateConnection {
            account_id: account_id.to_string(),
            delegate_id: delegate_id.to_string(),
            capabilities: Vec::new(),
            enabled: true,
            connected_at: now,
            last_heartbeat_at: now,
            sender: tx,
        };
        self.connections
            .write()
            .await
            .insert(slot_key(account_id, delegate_id), conn);
        rx
    }

    /// Remove a delegate's slot. Unknown slots are a no-op.
    pub async fn remove(&self, account_id: &str, delegate_id: &str) {
        self.connections
            .write()
            .await
            .remove(&slot_key(account_id, delegate_id));
    }

    /// Replace the capability tags advertised by a delegate.
    pub async fn set_capabilities(
        &self,
        account_id: &str,
        delegate_id: &str,
        capabilities: Vec<String>,
    ) -> bool {
        let mut conns = self.connections.write().await;
        match conns.get_mut(&slot_key(account_id, delegate_id)) {
            Some(conn) => {
                conn.capabilities = capabilities;
                true
            }
            None => false,
        }
    }

    /// Enable or disable work delivery to a delegate.
    pub async fn set_enabled(&self, account_id: &str, delegate_id: &str, enabled: bool) -> bool {
        let mut conns = self.connections.write().await;
        match conns.get_mut(&slot_key(account_id, delegate_id)) {
            Some(conn) => {
                conn.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Record liveness for a delegate (called on every inbound frame).
    pub async fn touch_heartbeat(
        &self,
        account_id: &str,
        delegate_id: &str,
        now: Timestamp,
    ) -> bool {
        let mut conns = self.connections.write().await;
        match conns.get_mut(&slot_key(account_id, delegate_id)) {
            Some(conn) => {
                conn.last_heartbeat_at = now;
                true
            }
            None => false,
        }
    }

    /// Whether a delegate currently holds a slot.
    pub async fn is_connected(&self, account_id: &str, delegate_id: &str) -> bool {
        self.connections
            .read()
            .await
            .contains_key(&slot_key(account_id, delegate_id))
    }

    /// Snapshots of every connection for one account.
    pub async fn connected_for_account(&self, account_id: &str) -> Vec<DelegateSnapshot> {
        self.connections
            .read()
            .await
            .values()
            .filter(|conn| conn.account_id == account_id)
            .map(DelegateConnection::snapshot)
            .collect()
    }

    /// Snapshots of every connection, ordered by account then delegate.
    pub async fn snapshot_all(&self) -> Vec<DelegateSnapshot> {
        let mut snapshots: Vec<DelegateSnapshot> = self
            .connections
            .read()
            .await
            .values()
            .map(DelegateConnection::snapshot)
            .collect();
        snapshots.sort_by(|a, b| {
            (a.account_id.as_str(), a.delegate_id.as_str())
                .cmp(&(b.account_id.as_str(), b.delegate_id.as_str()))
        });
        snapshots
    }

    /// Send a message to one delegate. Returns `false` when the delegate
    /// is not connected or its channel is closed.
    pub async fn send_to(&self, account_id: &str, delegate_id: &str, message: Message) -> bool {
        let conns = self.connections.read().await;
        match conns.get(&slot_key(account_id, delegate_id)) {
            Some(conn) => conn.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Send a message to every enabled connection of `account_id` that
    /// satisfies `predicate`. Returns the number of deliveries.
    ///
    /// Connections whose send channels are closed are silently skipped
    /// (they are cleaned up when their receive loop exits).
    pub async fn broadcast_filtered<F>(
        &self,
        account_id: &str,
        message: Message,
        predicate: F,
    ) -> usize
    where
        F: Fn(&DelegateSnapshot) -> bool,
    {
        let conns = self.connections.read().await;
        let mut count = 0;
        for conn in conns.values() {
            if conn.account_id != account_id || !conn.enabled {
                continue;
            }
            if !predicate(&conn.snapshot()) {
                continue;
            }
            if conn.sender.send(message.clone()).is_ok() {
                count += 1;
            }
        }
        count
    }

    /// Return the current number of connected delegates.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a Ping frame to every connected delegate.
    ///
    /// Used by the heartbeat task to keep connections alive and detect
    /// stale ones.
    pub async fn ping_all(&self) {
        let conns = self.connections.read().await;
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Ping(Bytes::new()));
        }
    }

    /// Send a Close frame to every connection, then clear the map.
    ///
    /// Used during graceful shutdown to notify all delegates before the
    /// server stops accepting new connections.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        conns.clear();
        tracing::info!(count, "Closed all delegate connections");
    }
}

impl Default for DelegateRegistry {
    fn default() -> Self {
        Self::new()
    }
}
