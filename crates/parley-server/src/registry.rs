//! Connection registry: which live connections belong to which user.
//!
//! Each connection owns a bounded outbound queue that its socket task
//! drains, so responses and pushed events reach one connection in FIFO
//! order. Users map to a group of connection ids; both maps are sharded
//! (`DashMap`), so broadcasts to different users never contend on a global
//! lock.

use std::time::Duration;

use dashmap::{DashMap, DashSet};
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use parley_shared::types::{ConnectionId, UserId};
use parley_shared::{HubEvent, ServerFrame};

/// Sending half of a connection's outbound queue.
pub type Outbound = mpsc::Sender<ServerFrame>;

struct ConnectionEntry {
    sender: Outbound,
    user: Option<UserId>,
    /// From the `Device-Name` handshake header, or the last login.
    device_name: Option<String>,
}

pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    groups: DashMap<UserId, DashSet<ConnectionId>>,
    send_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            groups: DashMap::new(),
            send_timeout,
        }
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Track a freshly accepted connection. It starts unbound.
    pub fn register(&self, conn: ConnectionId, sender: Outbound, device_name: Option<String>) {
        self.connections.insert(
            conn,
            ConnectionEntry {
                sender,
                user: None,
                device_name,
            },
        );
        debug!(conn = %conn, "connection registered");
    }

    /// Forget a closed connection and drop it from its user group.
    pub fn deregister(&self, conn: ConnectionId) {
        if let Some((_, entry)) = self.connections.remove(&conn) {
            if let Some(user) = entry.user {
                self.leave_group(conn, user);
            }
            debug!(conn = %conn, "connection deregistered");
        }
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Add `conn` to `user`'s group. Idempotent. A connection bound to a
    /// different user is moved.
    pub fn bind(&self, conn: ConnectionId, user: UserId) {
        let previous = match self.connections.get_mut(&conn) {
            Some(mut entry) => entry.user.replace(user),
            None => {
                warn!(conn = %conn, "bind on unknown connection ignored");
                return;
            }
        };

        if let Some(previous) = previous.filter(|p| *p != user) {
            self.leave_group(conn, previous);
        }
        self.groups.entry(user).or_default().insert(conn);
        debug!(conn = %conn, user = %user, "connection bound");
    }

    /// Remove `conn` from `user`'s group. No-op if it is not in it.
    pub fn unbind(&self, conn: ConnectionId, user: UserId) {
        if let Some(mut entry) = self.connections.get_mut(&conn) {
            if entry.user == Some(user) {
                entry.user = None;
            }
        }
        self.leave_group(conn, user);
    }

    fn leave_group(&self, conn: ConnectionId, user: UserId) {
        if let Some(group) = self.groups.get(&user) {
            group.remove(&conn);
        }
        self.groups.remove_if(&user, |_, group| group.is_empty());
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// The user a connection is bound to, if any.
    pub fn user_of(&self, conn: ConnectionId) -> Option<UserId> {
        self.connections.get(&conn).and_then(|entry| entry.user)
    }

    pub fn device_name_of(&self, conn: ConnectionId) -> Option<String> {
        self.connections
            .get(&conn)
            .and_then(|entry| entry.device_name.clone())
    }

    /// Remember the device a connection logged in from when the handshake
    /// did not name one.
    pub fn set_device_name_if_missing(&self, conn: ConnectionId, device_name: &str) {
        if let Some(mut entry) = self.connections.get_mut(&conn) {
            if entry.device_name.is_none() {
                entry.device_name = Some(device_name.to_string());
            }
        }
    }

    pub fn connections_of(&self, user: UserId) -> Vec<ConnectionId> {
        self.groups
            .get(&user)
            .map(|group| group.iter().map(|c| *c).collect())
            .unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    // ------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------

    /// Queue a frame for a single connection. Returns `false` if the
    /// connection is gone or did not drain within the send timeout.
    pub async fn send_to(&self, conn: ConnectionId, frame: ServerFrame) -> bool {
        let sender = match self.connections.get(&conn) {
            Some(entry) => entry.sender.clone(),
            None => return false,
        };
        deliver(conn, sender, frame, self.send_timeout).await
    }

    /// Push `event` to every connection currently in `user`'s group.
    ///
    /// The group is snapshotted first: connections bound later are not
    /// reached. Each recipient gets its own bounded wait and a failed
    /// recipient is skipped. Returns the number of connections reached.
    pub async fn broadcast(&self, user: UserId, event: HubEvent) -> usize {
        let targets: Vec<(ConnectionId, Outbound)> = self
            .connections_of(user)
            .into_iter()
            .filter_map(|conn| {
                self.connections
                    .get(&conn)
                    .map(|entry| (conn, entry.sender.clone()))
            })
            .collect();

        if targets.is_empty() {
            return 0;
        }

        let timeout = self.send_timeout;
        let sends = targets.into_iter().map(|(conn, sender)| {
            deliver(conn, sender, ServerFrame::Event(event.clone()), timeout)
        });
        let delivered = join_all(sends).await.into_iter().filter(|ok| *ok).count();

        debug!(user = %user, event = event.name(), delivered, "broadcast");
        delivered
    }
}

async fn deliver(conn: ConnectionId, sender: Outbound, frame: ServerFrame, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, sender.send(frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(_)) => {
            debug!(conn = %conn, "connection closed, frame dropped");
            false
        }
        Err(_) => {
            warn!(conn = %conn, "connection is not draining, frame dropped");
            false
        }
    }
}
