//! In-process realtime notification hub.
//!
//! Connections register with the hub and receive events through their own
//! bounded channel. Groups are plain string keys; a connection may belong to
//! any number of groups. Delivery is fire-and-forget: nothing is persisted
//! or replayed, and an event is dropped for a connection whose buffer is
//! full.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use common::TenantId;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Default per-connection buffer size.
pub const DEFAULT_CONNECTION_BUFFER: usize = 256;

/// Group of every member of a tenant. Receives `StockChanged`.
pub fn tenant_group(tenant_id: TenantId) -> String {
    format!("tenant:{tenant_id}")
}

/// Group of a tenant's administrators. Receives `OrderCreated`.
pub fn tenant_admins_group(tenant_id: TenantId) -> String {
    format!("tenant:{tenant_id}:admins")
}

/// Identifies one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An event pushed to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HubEvent {
    pub event: String,
    pub payload: Value,
}

/// Process-scoped connection and group registry.
pub struct NotificationHub {
    connections: DashMap<ConnectionId, mpsc::Sender<HubEvent>>,
    groups: DashMap<String, HashSet<ConnectionId>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl NotificationHub {
    /// Creates a hub with the default per-connection buffer.
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_CONNECTION_BUFFER)
    }

    /// Creates a hub whose connections buffer at most `buffer` events.
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            connections: DashMap::new(),
            groups: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Registers a new connection and returns its event receiver.
    pub fn on_connect(&self) -> (ConnectionId, mpsc::Receiver<HubEvent>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.buffer);
        self.connections.insert(id, tx);

        metrics::gauge!("hub_connections").set(self.connections.len() as f64);
        tracing::debug!(connection_id = %id, "Connection registered");

        (id, rx)
    }

    /// Removes a connection from the hub and from every group.
    pub fn on_disconnect(&self, id: ConnectionId) {
        if self.connections.remove(&id).is_none() {
            return;
        }

        self.groups.retain(|_, members| {
            members.remove(&id);
            !members.is_empty()
        });

        metrics::gauge!("hub_connections").set(self.connections.len() as f64);
        tracing::debug!(connection_id = %id, "Connection removed");
    }

    /// Adds a connection to a group. Returns false for an unknown connection.
    pub fn join_group(&self, id: ConnectionId, group: &str) -> bool {
        if !self.connections.contains_key(&id) {
            return false;
        }

        self.groups.entry(group.to_string()).or_default().insert(id);

        // A disconnect between the check and the insert has already swept
        // the groups.
        if !self.connections.contains_key(&id) {
            self.leave_group(id, group);
            return false;
        }

        tracing::debug!(connection_id = %id, group, "Joined group");
        true
    }

    /// Removes a connection from a group.
    pub fn leave_group(&self, id: ConnectionId, group: &str) {
        self.groups.remove_if_mut(group, |_, members| {
            members.remove(&id);
            members.is_empty()
        });
    }

    /// Sends an event to every member of a group and returns how many
    /// connections accepted it.
    pub fn broadcast(&self, group: &str, event: &str, payload: Value) -> usize {
        let members: Vec<ConnectionId> = match self.groups.get(group) {
            Some(members) => members.iter().copied().collect(),
            None => return 0,
        };

        let message = HubEvent {
            event: event.to_string(),
            payload,
        };

        let mut delivered = 0;
        for id in members {
            let Some(sender) = self.connections.get(&id).map(|s| s.value().clone()) else {
                continue;
            };

            match sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(connection_id = %id, group, event, "Connection buffer full, event dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(connection_id = %id, "Connection closed");
                }
            }
        }

        tracing::debug!(group, event, delivered, "Broadcast");
        delivered
    }

    /// Returns the number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Returns the number of connections in a group.
    pub fn group_size(&self, group: &str) -> usize {
        self.groups.get(group).map(|m| m.len()).unwrap_or(0)
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}
