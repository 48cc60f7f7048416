//! Relay server core: shared state, WebSocket handler, and event fan-out.
//!
//! The relay accepts WebSocket connections, tracks room memberships, and
//! fans chat, typing, status, and presence events out to the correct set of
//! connected peers. It persists nothing and acknowledges nothing: delivery
//! is best-effort and at-most-once, FIFO per origin connection, with no
//! ordering guarantee across senders.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use waveline_proto::codec;
use waveline_proto::event::{
    ClientEvent, ConversationEvent, PresenceBroadcast, ServerEvent, TypingBroadcast, TypingEvent,
};

use crate::rooms::{RoomName, RoomTable};

/// Path the WebSocket endpoint is served at.
pub const SOCKET_PATH: &str = "/ws";

/// Identifier for one client connection, minted at socket establishment
/// and dropped at disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Mints a fresh time-ordered connection identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared relay state holding the connection registry and room table.
///
/// Constructed once by the startup routine and injected into the handler by
/// `Arc` — there is no process-global registry.
pub struct RelayState {
    /// Maps connection ids to the sender half of each writer channel.
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Message>>>,
    /// Room membership table.
    pub rooms: RoomTable,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a new relay state with no connections and no rooms.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            rooms: RoomTable::new(),
        }
    }

    /// Registers a connection, storing the sender half of its writer channel.
    pub async fn register(&self, conn: ConnectionId, sender: mpsc::UnboundedSender<Message>) {
        let mut conns = self.connections.write().await;
        conns.insert(conn, sender);
    }

    /// Removes a connection from the registry, returning its sender if it
    /// existed.
    pub async fn unregister(
        &self,
        conn: ConnectionId,
    ) -> Option<mpsc::UnboundedSender<Message>> {
        let mut conns = self.connections.write().await;
        conns.remove(&conn)
    }

    /// Returns the number of currently registered connections.
    pub async fn connection_count(&self) -> usize {
        let conns = self.connections.read().await;
        conns.len()
    }

    /// Clones the senders for the given connections, skipping any that have
    /// already unregistered.
    async fn senders_for(
        &self,
        ids: &[ConnectionId],
    ) -> Vec<mpsc::UnboundedSender<Message>> {
        let conns = self.connections.read().await;
        ids.iter().filter_map(|id| conns.get(id).cloned()).collect()
    }

    /// Clones the senders for every connection except one.
    async fn senders_except(
        &self,
        exclude: ConnectionId,
    ) -> Vec<mpsc::UnboundedSender<Message>> {
        let conns = self.connections.read().await;
        conns
            .iter()
            .filter(|(id, _)| **id != exclude)
            .map(|(_, tx)| tx.clone())
            .collect()
    }

    /// Sends a WebSocket Close frame to all connected clients.
    ///
    /// Each writer task forwards the close frame, which the client-side
    /// reader observes as a disconnect. Used for graceful shutdown and in
    /// tests.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (conn, sender) in conns.iter() {
            tracing::info!(conn = %conn, "sending close frame");
            let _ = sender.send(Message::Close(None));
        }
    }
}

/// Handles an upgraded WebSocket connection for its whole lifetime.
///
/// The connection lifecycle:
/// 1. Mint a [`ConnectionId`] and register the writer channel.
/// 2. Run a writer task (channel → socket) and a reader loop (socket →
///    [`handle_client_frame`]) until either side ends.
/// 3. On disconnect, unregister and remove the connection from every room.
///
/// There is no registration handshake: clients connect anonymously and then
/// emit join events.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let conn = ConnectionId::new();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.register(conn, tx).await;
    tracing::info!(conn = %conn, "client connected");

    // Writer task: forward queued messages from the channel to the socket.
    let writer_conn = conn;
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn = %writer_conn, "WebSocket write failed");
                break;
            }
        }
    });

    // Reader loop: process inbound frames until the client goes away.
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_client_frame(conn, text.as_str(), &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::info!(conn = %conn, "received close frame");
                    break;
                }
                _ => {
                    // Ignore binary, ping, pong frames.
                }
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    // Cleanup: the only cancellation primitive. Broadcasts already pushed to
    // other listeners are unaffected.
    state.unregister(conn).await;
    let rooms_left = state.rooms.remove_connection(conn).await;
    tracing::info!(conn = %conn, rooms = rooms_left, "client disconnected");
}

/// Handles one text frame from a connected client.
///
/// Frames that do not decode to a [`ClientEvent`] are dropped silently —
/// a malformed payload must never take the connection (or the server) down.
async fn handle_client_frame(conn: ConnectionId, raw: &str, state: &Arc<RelayState>) {
    let event = match codec::decode::<ClientEvent>(raw) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(conn = %conn, error = %e, "dropping undecodable frame");
            return;
        }
    };

    match event {
        ClientEvent::JoinUserRoom(phone) => {
            let fresh = state.rooms.join(conn, RoomName::User(phone.clone())).await;
            tracing::debug!(conn = %conn, user = %phone, fresh, "joined user room");
        }
        ClientEvent::JoinConversationRoom(key) => {
            let fresh = state
                .rooms
                .join(conn, RoomName::Conversation(key.clone()))
                .await;
            tracing::debug!(conn = %conn, conversation = %key, fresh, "joined conversation room");
        }
        ClientEvent::LeaveConversationRoom(key) => {
            let was_member = state
                .rooms
                .leave(conn, &RoomName::Conversation(key.clone()))
                .await;
            tracing::debug!(conn = %conn, conversation = %key, was_member, "left conversation room");
        }
        ClientEvent::SendMessage(event) => {
            relay_conversation_event(state, conn, event, ServerEvent::NewMessage).await;
        }
        ClientEvent::TypingStart(typing) => {
            relay_typing(state, conn, typing, true).await;
        }
        ClientEvent::TypingStop(typing) => {
            relay_typing(state, conn, typing, false).await;
        }
        ClientEvent::MessageStatusUpdate(event) => {
            relay_conversation_event(state, conn, event, ServerEvent::MessageStatusChanged).await;
        }
        ClientEvent::UserOnline(user_id) => {
            relay_presence(state, conn, user_id).await;
        }
    }
}

/// Forwards a conversation-scoped payload verbatim to its conversation room.
///
/// `wrap` selects the outbound event kind (`new-message` or
/// `message-status-changed`); the payload itself is untouched.
async fn relay_conversation_event(
    state: &Arc<RelayState>,
    conn: ConnectionId,
    event: ConversationEvent,
    wrap: fn(ConversationEvent) -> ServerEvent,
) {
    let room = RoomName::Conversation(event.conversation_id.clone());
    broadcast_to_room(state, &room, conn, &wrap(event)).await;
}

/// Builds and broadcasts a `user-typing` event to the conversation room.
///
/// The boolean comes from which variant the client sent, not from the
/// payload; two consecutive `typing-start`s yield two deliveries.
async fn relay_typing(
    state: &Arc<RelayState>,
    conn: ConnectionId,
    typing: TypingEvent,
    is_typing: bool,
) {
    let room = RoomName::Conversation(typing.conversation_id.clone());
    let broadcast = ServerEvent::UserTyping(TypingBroadcast {
        conversation_id: typing.conversation_id,
        user_id: typing.user_id,
        is_typing,
    });
    broadcast_to_room(state, &room, conn, &broadcast).await;
}

/// Builds and broadcasts a `user-status-changed` event to every other
/// connection on the server.
///
/// Presence is global, not room-scoped; `last_seen` is stamped here.
async fn relay_presence(state: &Arc<RelayState>, conn: ConnectionId, user_id: String) {
    let broadcast = ServerEvent::UserStatusChanged(PresenceBroadcast {
        user_id,
        is_online: true,
        last_seen: chrono::Utc::now().to_rfc3339(),
    });
    broadcast_to_all_except(state, conn, &broadcast).await;
}

/// Broadcasts an event to every member of a room except the sender.
///
/// A room with no other members is a silent no-op. Failed channel pushes
/// are ignored — the owning writer task's teardown performs the cleanup.
async fn broadcast_to_room(
    state: &Arc<RelayState>,
    room: &RoomName,
    sender: ConnectionId,
    event: &ServerEvent,
) {
    let frame = match codec::encode(event) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode broadcast");
            return;
        }
    };

    let listeners = state.rooms.members_except(room, sender).await;
    if listeners.is_empty() {
        tracing::debug!(room = %room, "broadcast to empty room");
        return;
    }

    tracing::debug!(room = %room, listeners = listeners.len(), "broadcasting");
    for tx in state.senders_for(&listeners).await {
        let _ = tx.send(Message::Text(frame.clone().into()));
    }
}

/// Broadcasts an event to every connection on the server except the sender.
async fn broadcast_to_all_except(
    state: &Arc<RelayState>,
    sender: ConnectionId,
    event: &ServerEvent,
) {
    let frame = match codec::encode(event) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode broadcast");
            return;
        }
    };

    for tx in state.senders_except(sender).await {
        let _ = tx.send(Message::Text(frame.clone().into()));
    }
}

/// Starts the relay server on the given address and returns the bound
/// address and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-constructed [`RelayState`].
///
/// Tests use this to keep a handle on the state and observe memberships.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    // Browser clients connect from arbitrary origins; the upgrade endpoint
    // accepts them all.
    let cors = tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST]);

    let app = axum::Router::new()
        .route(SOCKET_PATH, axum::routing::get(ws_handler))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
