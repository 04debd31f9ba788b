use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// Handle to one live websocket session. Identity is the connection id; `tx`
/// feeds the session's forward task (the half that writes to the socket).
#[derive(Debug, Clone)]
pub struct ConnHandle {
    pub conn_id: Uuid,
    tx: UnboundedSender<String>,
}

impl ConnHandle {
    pub fn new(tx: UnboundedSender<String>) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            tx,
        }
    }

    /// Serialize and enqueue an event for this session. Returns false when
    /// the session is gone; callers treat that the same as an absent peer.
    pub fn send<T: Serialize>(&self, event: &T) -> bool {
        match serde_json::to_string(event) {
            Ok(s) => self.tx.send(s).is_ok(),
            Err(e) => {
                tracing::error!("failed to serialize outbound event: {}", e);
                false
            }
        }
    }
}

/// Process-wide map of user id -> live session. One active handle per user,
/// last registration wins; the map is rebuilt empty on restart. A secondary
/// conn-id index gives O(1) reverse lookup on disconnect.
pub struct ConnectionRegistry {
    by_user: DashMap<String, ConnHandle>,
    by_conn: DashMap<Uuid, String>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            by_user: DashMap::new(),
            by_conn: DashMap::new(),
        }
    }

    /// Insert or overwrite the mapping for `user_id`. Idempotent; when a user
    /// reconnects the newer handle displaces the older one.
    pub fn register(&self, user_id: &str, handle: ConnHandle) {
        let conn_id = handle.conn_id;
        self.by_conn.insert(conn_id, user_id.to_string());
        if let Some(prev) = self.by_user.insert(user_id.to_string(), handle) {
            if prev.conn_id != conn_id {
                // drop the displaced connection's reverse entry, unless it was
                // already reused for someone else
                self.by_conn
                    .remove_if(&prev.conn_id, |_, uid| uid.as_str() == user_id);
            }
        }
    }

    /// Live handle for `user_id`, if any. Absence is the normal offline
    /// branch ("deliver later via history"), not an error.
    pub fn lookup(&self, user_id: &str) -> Option<ConnHandle> {
        self.by_user.get(user_id).map(|entry| entry.value().clone())
    }

    /// Remove the mapping owned by `handle`. The delete compares connection
    /// identity, so a stale disconnect never evicts a fresher registration.
    /// Idempotent: unregistering twice, or a never-registered handle, is a
    /// no-op.
    pub fn unregister(&self, handle: &ConnHandle) {
        if let Some((_, user_id)) = self.by_conn.remove(&handle.conn_id) {
            self.by_user
                .remove_if(&user_id, |_, h| h.conn_id == handle.conn_id);
        }
    }

    pub fn len(&self) -> usize {
        self.by_user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }
}
