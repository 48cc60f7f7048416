//! WebSocket client for the Waveline relay.
//!
//! [`RelayClient::connect`] establishes the connection and spawns a
//! background reader task that decodes server events onto a channel. All
//! emit methods are fire-and-forget at the protocol level — the relay sends
//! no acknowledgements — but surface local transport failures as errors.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use waveline_proto::codec::{self, CodecError};
use waveline_proto::event::{ClientEvent, ConversationEvent, ServerEvent, TypingEvent};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for connecting to the relay server.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the incoming server event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Errors produced by [`RelayClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The relay URL could not be parsed or has the wrong scheme.
    #[error("invalid relay URL {url}: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Connecting to the relay timed out.
    #[error("connection to relay timed out")]
    Timeout,

    /// The relay could not be reached.
    #[error("relay unreachable: {0}")]
    Unreachable(String),

    /// The connection to the relay has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Encoding an outbound event failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Underlying WebSocket I/O failure.
    #[error("websocket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Asynchronous client for the Waveline relay.
///
/// Created via [`RelayClient::connect`]. The client joins rooms and emits
/// events over the write half while a background task decodes inbound
/// server events onto a channel read through [`RelayClient::next_event`].
pub struct RelayClient {
    /// The relay server URL (ws:// or wss://).
    relay_url: String,
    /// Write half of the WebSocket connection (shared for concurrent emits).
    ws_sender: Arc<Mutex<WsSender>>,
    /// Channel of server events from the background reader task.
    incoming: Mutex<mpsc::Receiver<ServerEvent>>,
    /// Whether the WebSocket connection to the relay is active.
    connected: Arc<AtomicBool>,
    /// Handle to the background reader task (kept alive for the client's lifetime).
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl RelayClient {
    /// Connects to a relay server.
    ///
    /// Validates the URL, establishes the WebSocket connection (10s
    /// timeout), and spawns the background reader task. There is no
    /// registration handshake; callers emit their join events next.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidUrl`] for unparseable or non-WebSocket URLs.
    /// - [`ClientError::Timeout`] if the connection attempt times out.
    /// - [`ClientError::Unreachable`] if the relay refused the connection.
    /// - [`ClientError::Io`] for other transport failures.
    pub async fn connect(relay_url: &str) -> Result<Self, ClientError> {
        let parsed = url::Url::parse(relay_url).map_err(|e| ClientError::InvalidUrl {
            url: relay_url.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(ClientError::InvalidUrl {
                url: relay_url.to_string(),
                reason: format!("unsupported scheme {:?}", parsed.scheme()),
            });
        }

        let (ws_stream, _response) =
            tokio::time::timeout(CONNECT_TIMEOUT, connect_async(relay_url))
                .await
                .map_err(|_| {
                    tracing::warn!(url = relay_url, "relay WebSocket connect timed out");
                    ClientError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url = relay_url, err = %e, "relay WebSocket connect failed");
                    map_ws_connect_error(&e)
                })?;

        let (ws_sender, ws_reader) = ws_stream.split();

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));
        let reader_connected = Arc::clone(&connected);

        let reader_handle = tokio::spawn(reader_loop(ws_reader, tx, reader_connected));

        tracing::info!(url = relay_url, "connected to relay");

        Ok(Self {
            relay_url: relay_url.to_string(),
            ws_sender: Arc::new(Mutex::new(ws_sender)),
            incoming: Mutex::new(rx),
            connected,
            _reader_handle: reader_handle,
        })
    }

    /// Returns the relay server URL this client is connected to.
    #[must_use]
    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    /// Returns whether the connection to the relay is still active.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Joins the per-user room named by a phone number.
    ///
    /// All of a user's sessions join the same room. Rejoining is a relay-side
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] or [`ClientError::Io`] on
    /// transport failure.
    pub async fn join_user_room(&self, user_phone: &str) -> Result<(), ClientError> {
        self.emit(&ClientEvent::JoinUserRoom(user_phone.to_string()))
            .await
    }

    /// Joins a conversation room by its key.
    ///
    /// Keys are typically derived with
    /// [`ConversationKey::between`](waveline_proto::conversation::ConversationKey::between).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] or [`ClientError::Io`] on
    /// transport failure.
    pub async fn join_conversation_room(&self, conversation_id: &str) -> Result<(), ClientError> {
        self.emit(&ClientEvent::JoinConversationRoom(conversation_id.to_string()))
            .await
    }

    /// Leaves a conversation room by its key.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] or [`ClientError::Io`] on
    /// transport failure.
    pub async fn leave_conversation_room(&self, conversation_id: &str) -> Result<(), ClientError> {
        self.emit(&ClientEvent::LeaveConversationRoom(conversation_id.to_string()))
            .await
    }

    /// Broadcasts a chat message to its conversation room.
    ///
    /// The relay forwards the payload verbatim to every other member; the
    /// sender hears nothing back on success.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] or [`ClientError::Io`] on
    /// transport failure.
    pub async fn send_message(&self, event: ConversationEvent) -> Result<(), ClientError> {
        self.emit(&ClientEvent::SendMessage(event)).await
    }

    /// Signals that a user started typing in a conversation.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] or [`ClientError::Io`] on
    /// transport failure.
    pub async fn typing_start(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<(), ClientError> {
        self.emit(&ClientEvent::TypingStart(TypingEvent {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
        }))
        .await
    }

    /// Signals that a user stopped typing in a conversation.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] or [`ClientError::Io`] on
    /// transport failure.
    pub async fn typing_stop(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<(), ClientError> {
        self.emit(&ClientEvent::TypingStop(TypingEvent {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
        }))
        .await
    }

    /// Broadcasts a delivery/read status change to its conversation room.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] or [`ClientError::Io`] on
    /// transport failure.
    pub async fn update_message_status(
        &self,
        event: ConversationEvent,
    ) -> Result<(), ClientError> {
        self.emit(&ClientEvent::MessageStatusUpdate(event)).await
    }

    /// Announces the user as online to every other connection.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] or [`ClientError::Io`] on
    /// transport failure.
    pub async fn announce_online(&self, user_id: &str) -> Result<(), ClientError> {
        self.emit(&ClientEvent::UserOnline(user_id.to_string()))
            .await
    }

    /// Emits a raw client event.
    ///
    /// The typed methods above all route through here; this is the escape
    /// hatch for callers constructing events directly.
    ///
    /// # Errors
    ///
    /// - [`ClientError::ConnectionClosed`] if the relay connection is down.
    /// - [`ClientError::Codec`] if the event cannot be encoded.
    /// - [`ClientError::Io`] for WebSocket send failures.
    pub async fn emit(&self, event: &ClientEvent) -> Result<(), ClientError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(ClientError::ConnectionClosed);
        }

        let frame = codec::encode(event)?;

        let mut sender = self.ws_sender.lock().await;
        sender.send(Message::Text(frame.into())).await.map_err(|e| {
            tracing::warn!(err = %e, "relay emit failed");
            self.connected.store(false, Ordering::Relaxed);
            ClientError::ConnectionClosed
        })?;

        Ok(())
    }

    /// Receives the next server event.
    ///
    /// Blocks until an event arrives from the background reader task.
    /// Returns `None` once the connection is closed and the channel drained.
    pub async fn next_event(&self) -> Option<ServerEvent> {
        let mut rx = self.incoming.lock().await;
        rx.recv().await
    }

    /// Sends a Close frame to the relay.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Io`] if the close frame cannot be sent.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.connected.store(false, Ordering::Relaxed);
        let mut sender = self.ws_sender.lock().await;
        sender
            .send(Message::Close(None))
            .await
            .map_err(|e| ClientError::Io(std::io::Error::other(format!("close failed: {e}"))))
    }
}

/// Background task that reads WebSocket frames and dispatches server events.
///
/// Malformed frames are logged and skipped — the task does not disconnect
/// on bad data. Sets `connected` to `false` when the WebSocket closes or
/// errors out.
async fn reader_loop(
    mut ws_reader: WsReader,
    tx: mpsc::Sender<ServerEvent>,
    connected: Arc<AtomicBool>,
) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match codec::decode::<ServerEvent>(text.as_str()) {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        // Receiver dropped — client was dropped, exit.
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed relay frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("relay WebSocket closed by server");
                break;
            }
            Ok(_) => {
                // Ignore binary, ping, pong frames.
            }
            Err(e) => {
                tracing::warn!(err = %e, "relay WebSocket read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    tracing::debug!("relay reader task exiting");
}

/// Maps a `tokio_tungstenite` connection error to a [`ClientError`].
fn map_ws_connect_error(err: &tokio_tungstenite::tungstenite::Error) -> ClientError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            // DNS/network failures surface as io errors.
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                ClientError::Unreachable(io_err.to_string())
            } else {
                ClientError::Io(std::io::Error::other(io_err.to_string()))
            }
        }
        WsError::Http(response) => ClientError::Io(std::io::Error::other(format!(
            "relay HTTP error: status {}",
            response.status()
        ))),
        other => ClientError::Io(std::io::Error::other(format!(
            "relay connection error: {other}"
        ))),
    }
}
