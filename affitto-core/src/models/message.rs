use serde::{Deserialize, Serialize};

/// Chat message persisted by the server and pushed over WS. Immutable once
/// stored; `delivered` is a best-effort flag set after a successful live push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_id: String,
    pub property_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub receiver_id: String,
    pub receiver_name: String,
    pub body: String,
    /// RFC3339 UTC, strictly increasing within a (listing, pair) thread.
    pub created_at: String,
    pub delivered: bool,
}
