/* This file defines how data travels through the web socket.
   Every frame is a JSON envelope { type, payload }. ClientEvent lists what a
   client may send, ServerEvent what the server may push back. The server
   matches ClientEvent exhaustively, so adding a variant forces every handler
   to deal with it. */
use serde::{Deserialize, Serialize};

use crate::{error::Error, models::Message};

/// Client → Server events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientEvent {
    /// Announce identity and register this connection for live delivery.
    /// Payload is the bare user id, matching the original handshake.
    #[serde(rename = "user_connected")]
    UserConnected(String),
    /// Ask the server to persist and route a message.
    #[serde(rename = "send_message")]
    SendMessage(SendMessage),
    /// Ask for the full thread between two users for one listing.
    #[serde(rename = "get_messages")]
    GetMessages(GetMessages),
}

/// Server → Client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerEvent {
    /// Ack to the sender: the message is durably stored (id + timestamp set).
    #[serde(rename = "message_sent")]
    MessageSent(Message),
    /// Live push to the receiver, if connected.
    #[serde(rename = "new_message")]
    NewMessage(Message),
    /// Send failed; scoped to the sender only.
    #[serde(rename = "message_error")]
    MessageError(EventError),
    /// Ordered thread answering a get_messages request.
    #[serde(rename = "messages_history")]
    MessagesHistory(Vec<Message>),
    /// History lookup failed; scoped to the requester only.
    #[serde(rename = "messages_error")]
    MessagesError(EventError),
}

/// Payload for send_message (C→S).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub property_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub message: String,
}

/// Payload for get_messages (C→S).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMessages {
    pub property_id: String,
    pub user_id_1: String,
    pub user_id_2: String,
}

/// Payload for message_error / messages_error (S→C).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventError {
    pub error: Error,
}

impl EventError {
    pub fn new(error: Error) -> Self {
        Self { error }
    }
}
