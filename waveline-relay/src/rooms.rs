//! Room membership table for the relay server.
//!
//! Tracks which connections belong to which rooms, plus the reverse index
//! used to clear a connection out of every room on disconnect. Membership
//! changes only through explicit join/leave and disconnect cleanup; nothing
//! is inferred from message content.
//!
//! Entries are ephemeral — lost on relay restart, same as the connection
//! registry. Clients re-emit their joins on reconnect.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

use crate::relay::ConnectionId;

/// A named broadcast group.
///
/// The two room kinds the relay knows about: per-user rooms (named by phone
/// number, reaching all of a user's sessions) and per-conversation rooms
/// (named by the conversation key, reaching viewers of one chat).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomName {
    /// All sessions authenticated as one user.
    User(String),
    /// All sessions with one conversation open.
    Conversation(String),
}

impl std::fmt::Display for RoomName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(phone) => write!(f, "user-{phone}"),
            Self::Conversation(key) => write!(f, "conversation-{key}"),
        }
    }
}

#[derive(Default)]
struct Membership {
    /// Room name → current members.
    members: HashMap<RoomName, HashSet<ConnectionId>>,
    /// Connection → rooms it has joined (for disconnect cleanup).
    joined: HashMap<ConnectionId, HashSet<RoomName>>,
}

/// In-memory membership table mapping rooms to connection sets.
///
/// Both directions of the mapping live behind one [`RwLock`] so every
/// join/leave/disconnect mutation is atomic with respect to broadcasts.
pub struct RoomTable {
    inner: RwLock<Membership>,
}

impl Default for RoomTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomTable {
    /// Creates a new, empty membership table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Membership::default()),
        }
    }

    /// Adds a connection to a room.
    ///
    /// Idempotent: joining a room the connection is already in is a no-op.
    /// Returns `true` if the connection was newly added.
    pub async fn join(&self, conn: ConnectionId, room: RoomName) -> bool {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let added = inner.members.entry(room.clone()).or_default().insert(conn);
        if added {
            inner.joined.entry(conn).or_default().insert(room);
        }
        added
    }

    /// Removes a connection from a room.
    ///
    /// Returns `true` if the connection was a member. Empty rooms are
    /// dropped from the table.
    pub async fn leave(&self, conn: ConnectionId, room: &RoomName) -> bool {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        let Some(members) = inner.members.get_mut(room) else {
            return false;
        };
        let removed = members.remove(&conn);
        let room_emptied = removed && members.is_empty();
        if room_emptied {
            inner.members.remove(room);
        }
        if removed {
            let conn_emptied = inner.joined.get_mut(&conn).is_some_and(|rooms| {
                rooms.remove(room);
                rooms.is_empty()
            });
            if conn_emptied {
                inner.joined.remove(&conn);
            }
        }
        removed
    }

    /// Removes a connection from every room it joined.
    ///
    /// Returns the number of rooms the connection was removed from. This is
    /// the disconnect path; it is unconditional and leaves no trace of the
    /// connection in the table.
    pub async fn remove_connection(&self, conn: ConnectionId) -> usize {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        let Some(rooms) = inner.joined.remove(&conn) else {
            return 0;
        };
        let count = rooms.len();
        for room in rooms {
            let emptied = inner.members.get_mut(&room).is_some_and(|members| {
                members.remove(&conn);
                members.is_empty()
            });
            if emptied {
                inner.members.remove(&room);
            }
        }
        count
    }

    /// Returns the members of a room, excluding one connection.
    ///
    /// The exclusion is how broadcasts skip their sender. An unknown room
    /// yields an empty list.
    pub async fn members_except(&self, room: &RoomName, exclude: ConnectionId) -> Vec<ConnectionId> {
        let inner = self.inner.read().await;
        inner.members.get(room).map_or_else(Vec::new, |members| {
            members.iter().copied().filter(|c| *c != exclude).collect()
        })
    }

    /// Returns whether a connection is currently a member of a room.
    pub async fn is_member(&self, room: &RoomName, conn: ConnectionId) -> bool {
        let inner = self.inner.read().await;
        inner.members.get(room).is_some_and(|m| m.contains(&conn))
    }

    /// Returns the number of members currently in a room.
    pub async fn member_count(&self, room: &RoomName) -> usize {
        let inner = self.inner.read().await;
        inner.members.get(room).map_or(0, HashSet::len)
    }

    /// Returns the number of rooms the table currently holds.
    pub async fn room_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner.members.len()
    }
}
