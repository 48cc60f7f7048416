//! Chat message model shared by clients and tests.
//!
//! The relay forwards message payloads verbatim and never interprets them;
//! these types exist so that clients and tests build well-formed payloads
//! matching the application's message records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::ConversationEvent;

/// Delivery status of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Accepted by the sender's client.
    Sent,
    /// Reached the recipient's device.
    Delivered,
    /// Opened by the recipient.
    Read,
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::Delivered => write!(f, "delivered"),
            Self::Read => write!(f, "read"),
        }
    }
}

/// Direction of a message relative to the local user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Received from the other party.
    Incoming,
    /// Authored by the local user.
    Outgoing,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incoming => write!(f, "incoming"),
            Self::Outgoing => write!(f, "outgoing"),
        }
    }
}

/// A chat message record as the application layer sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message identifier.
    pub id: String,
    /// Canonical conversation key this message belongs to.
    pub conversation_id: String,
    /// Message body.
    pub text: String,
    /// RFC 3339 timestamp from the authoring client.
    pub timestamp: String,
    /// Incoming or outgoing relative to the author.
    pub direction: Direction,
    /// Current delivery status.
    pub status: MessageStatus,
    /// Display name of the sender, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
}

impl ChatMessage {
    /// Creates an outgoing message with a fresh time-ordered id (UUID v7)
    /// and the current UTC timestamp, in `Sent` status.
    #[must_use]
    pub fn outgoing(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            conversation_id: conversation_id.into(),
            text: text.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            direction: Direction::Outgoing,
            status: MessageStatus::Sent,
            sender_name: None,
        }
    }

    /// Sets the sender display name.
    #[must_use]
    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }
}

impl From<ChatMessage> for ConversationEvent {
    /// Flattens the record into a wire payload routed by `conversation_id`.
    fn from(msg: ChatMessage) -> Self {
        use serde_json::Value;

        let mut event = Self::new(msg.conversation_id);
        event.insert("id", Value::String(msg.id));
        event.insert("text", Value::String(msg.text));
        event.insert("timestamp", Value::String(msg.timestamp));
        event.insert("direction", Value::String(msg.direction.to_string()));
        event.insert("status", Value::String(msg.status.to_string()));
        if let Some(name) = msg.sender_name {
            event.insert("sender_name", Value::String(name));
        }
        event
    }
}
