//! Async client library for the Waveline realtime relay.
//!
//! Wraps the WebSocket wire protocol in typed methods: connect, join or
//! leave rooms, emit events, and read server events off a channel. The
//! surrounding application owns reconnection policy; this library reports
//! a lost connection and leaves the retry loop to its caller.

pub mod client;

pub use client::{ClientError, RelayClient};
