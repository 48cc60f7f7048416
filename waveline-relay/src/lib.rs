//! Waveline relay server library.
//!
//! Exposes the relay server for use in tests and embedding. The relay
//! accepts WebSocket connections, tracks room memberships, and fans out
//! chat, typing, status, and presence events between client sessions.

pub mod config;
pub mod relay;
pub mod rooms;
