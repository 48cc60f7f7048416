//! Client and server event types for the relay wire protocol.
//!
//! Events travel as JSON text frames shaped `{"event": <name>, "data": <payload>}`
//! with kebab-case event names. Message and status payloads are routed by their
//! `conversation_id` and otherwise forwarded verbatim — unknown fields are
//! preserved through the flattened payload map. Typing and presence broadcasts
//! are constructed by the relay rather than forwarded.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A conversation-scoped payload: routed by `conversation_id`, everything
/// else carried opaquely and forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEvent {
    /// Key of the conversation room this event is routed to.
    pub conversation_id: String,
    /// Remaining payload fields, preserved as-is.
    #[serde(flatten)]
    pub payload: serde_json::Map<String, Value>,
}

impl ConversationEvent {
    /// Creates an event with an empty payload.
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            payload: serde_json::Map::new(),
        }
    }

    /// Inserts a payload field, replacing any existing value under `key`.
    pub fn insert(&mut self, key: &str, value: Value) {
        self.payload.insert(key.to_string(), value);
    }

    /// Builder-style [`Self::insert`].
    #[must_use]
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.insert(key, value);
        self
    }

    /// Returns a payload field, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

/// A typing notification from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingEvent {
    /// Conversation the user is typing in.
    pub conversation_id: String,
    /// The user who is typing.
    pub user_id: String,
}

/// The relay-built `user-typing` broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingBroadcast {
    /// Conversation the typing applies to.
    pub conversation_id: String,
    /// The user typing (or no longer typing).
    pub user_id: String,
    /// `true` on `typing-start`, `false` on `typing-stop`.
    pub is_typing: bool,
}

/// The relay-built `user-status-changed` broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceBroadcast {
    /// The user whose presence changed.
    pub user_id: String,
    /// Whether the user is currently online.
    pub is_online: bool,
    /// RFC 3339 UTC timestamp stamped by the relay.
    pub last_seen: String,
}

/// Events a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Join the room named by the user's phone number.
    JoinUserRoom(String),
    /// Join a conversation room by its key.
    JoinConversationRoom(String),
    /// Leave a conversation room by its key.
    LeaveConversationRoom(String),
    /// Broadcast a chat message to the conversation room.
    SendMessage(ConversationEvent),
    /// The user started typing in a conversation.
    TypingStart(TypingEvent),
    /// The user stopped typing in a conversation.
    TypingStop(TypingEvent),
    /// Broadcast a delivery/read status change to the conversation room.
    MessageStatusUpdate(ConversationEvent),
    /// Announce the user as online to every other connection.
    UserOnline(String),
}

/// Events the relay sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// A chat message, forwarded verbatim from the sender.
    NewMessage(ConversationEvent),
    /// A typing state change in a conversation.
    UserTyping(TypingBroadcast),
    /// A delivery/read status change, forwarded verbatim from the sender.
    MessageStatusChanged(ConversationEvent),
    /// A user came online (or went offline).
    UserStatusChanged(PresenceBroadcast),
}
