//! Conversation identity for two-party chats.
//!
//! The web client derives conversation room names by string concatenation at
//! each call site, which invites direction-dependent mismatches (user A and
//! user B computing different names for the same chat). [`ConversationKey`]
//! replaces that with one canonical derivation rule shared by every caller.

use serde::{Deserialize, Serialize};

/// Canonical identifier for a two-party conversation.
///
/// Derived from the participants' phone numbers ordered lexicographically
/// ascending and joined with `-`, so both sides always compute the same key:
/// `between("222", "111")` and `between("111", "222")` are equal.
///
/// The relay itself never derives keys — it routes on whatever key the client
/// declared. [`ConversationKey::from_raw`] wraps such a client-supplied key
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    /// Derives the canonical key for a conversation between two users.
    #[must_use]
    pub fn between(a: &str, b: &str) -> Self {
        if a <= b {
            Self(format!("{a}-{b}"))
        } else {
            Self(format!("{b}-{a}"))
        }
    }

    /// Wraps an already-derived key without re-deriving it.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ConversationKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
