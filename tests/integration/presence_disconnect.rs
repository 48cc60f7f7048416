//! Integration tests for presence broadcasts and disconnect cleanup.
//!
//! Presence (`user-online`) fans out to every other connection regardless
//! of rooms. Disconnect is the only cancellation primitive: it removes the
//! connection from the registry and from every room, and nothing else.
//!
//! Verification command: `cargo test --test presence_disconnect`

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use waveline::RelayClient;
use waveline_proto::event::{ConversationEvent, ServerEvent};
use waveline_relay::relay::{RelayState, start_server_with_state};
use waveline_relay::rooms::RoomName;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn start_relay() -> (std::net::SocketAddr, Arc<RelayState>) {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start test relay");
    (addr, state)
}

async fn connect(addr: std::net::SocketAddr) -> RelayClient {
    RelayClient::connect(&format!("ws://{addr}/ws"))
        .await
        .expect("failed to connect client")
}

async fn recv(client: &RelayClient) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(5), client.next_event())
        .await
        .expect("recv timed out")
        .expect("event stream ended")
}

async fn assert_silent(client: &RelayClient) {
    let result = tokio::time::timeout(Duration::from_millis(250), client.next_event()).await;
    assert!(result.is_err(), "expected silence, got {result:?}");
}

async fn wait_for_members(state: &RelayState, room: &RoomName, expected: usize) {
    for _ in 0..100 {
        if state.rooms.member_count(room).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("room {room} never reached {expected} members");
}

async fn wait_for_connections(state: &RelayState, expected: usize) {
    for _ in 0..100 {
        if state.connection_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server never reached {expected} connections");
}

fn conv_room(key: &str) -> RoomName {
    RoomName::Conversation(key.to_string())
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// `user-online` reaches every other connection, rooms or no rooms, and
/// never the announcer.
#[tokio::test]
async fn presence_reaches_all_other_connections() {
    let (addr, state) = start_relay().await;

    let alice = connect(addr).await;
    let bob = connect(addr).await;
    let carol = connect(addr).await;
    wait_for_connections(&state, 3).await;

    // Bob is in a room, Carol is not; both hear about Alice.
    bob.join_conversation_room("111-222").await.unwrap();
    wait_for_members(&state, &conv_room("111-222"), 1).await;

    alice.announce_online("111").await.unwrap();

    for client in [&bob, &carol] {
        match recv(client).await {
            ServerEvent::UserStatusChanged(presence) => {
                assert_eq!(presence.user_id, "111");
                assert!(presence.is_online);
                assert!(
                    chrono::DateTime::parse_from_rfc3339(&presence.last_seen).is_ok(),
                    "last_seen is not RFC 3339: {}",
                    presence.last_seen
                );
            }
            other => panic!("expected UserStatusChanged, got {other:?}"),
        }
    }
    assert_silent(&alice).await;
}

/// Each announcement is delivered independently; nothing is coalesced.
#[tokio::test]
async fn repeated_announcements_are_all_delivered() {
    let (addr, state) = start_relay().await;

    let alice = connect(addr).await;
    let bob = connect(addr).await;
    wait_for_connections(&state, 2).await;

    alice.announce_online("111").await.unwrap();
    alice.announce_online("111").await.unwrap();

    for _ in 0..2 {
        match recv(&bob).await {
            ServerEvent::UserStatusChanged(presence) => {
                assert_eq!(presence.user_id, "111");
            }
            other => panic!("expected UserStatusChanged, got {other:?}"),
        }
    }
    assert_silent(&bob).await;
}

// ---------------------------------------------------------------------------
// Disconnect cleanup
// ---------------------------------------------------------------------------

/// After a member disconnects, a broadcast into the room reaches zero
/// listeners and the server keeps serving the remaining connection.
#[tokio::test]
async fn broadcast_into_emptied_room_is_harmless() {
    let (addr, state) = start_relay().await;

    let alice = connect(addr).await;
    let bob = connect(addr).await;

    alice.join_conversation_room("X").await.unwrap();
    bob.join_conversation_room("X").await.unwrap();
    wait_for_members(&state, &conv_room("X"), 2).await;

    alice.close().await.unwrap();
    wait_for_members(&state, &conv_room("X"), 1).await;

    // Zero listeners besides Bob himself; must not error server-side.
    bob.send_message(ConversationEvent::new("X").with("text", json!("anyone?")))
        .await
        .unwrap();
    assert_silent(&bob).await;

    // Bob's connection is still healthy.
    let carol = connect(addr).await;
    carol.join_conversation_room("X").await.unwrap();
    wait_for_members(&state, &conv_room("X"), 2).await;

    bob.send_message(ConversationEvent::new("X").with("text", json!("there you are")))
        .await
        .unwrap();
    match recv(&carol).await {
        ServerEvent::NewMessage(event) => {
            assert_eq!(event.get("text"), Some(&json!("there you are")));
        }
        other => panic!("expected NewMessage, got {other:?}"),
    }
}

/// Disconnect removes the connection from every room and from the
/// connection registry; it receives nothing further.
#[tokio::test]
async fn disconnect_removes_connection_from_all_rooms() {
    let (addr, state) = start_relay().await;

    let alice = connect(addr).await;
    let bob = connect(addr).await;

    alice.join_user_room("111").await.unwrap();
    alice.join_conversation_room("111-222").await.unwrap();
    alice.join_conversation_room("111-333").await.unwrap();
    bob.join_conversation_room("111-222").await.unwrap();
    wait_for_members(&state, &conv_room("111-222"), 2).await;
    wait_for_members(&state, &conv_room("111-333"), 1).await;

    alice.close().await.unwrap();
    wait_for_connections(&state, 1).await;

    // Every membership is gone; only Bob's room survives.
    assert_eq!(
        state.rooms.member_count(&RoomName::User("111".to_string())).await,
        0
    );
    assert_eq!(state.rooms.member_count(&conv_room("111-222")).await, 1);
    assert_eq!(state.rooms.member_count(&conv_room("111-333")).await, 0);
    assert_eq!(state.rooms.room_count().await, 1);

    // Events keep flowing to nobody but current members; the disconnected
    // client's stream has ended.
    bob.send_message(ConversationEvent::new("111-222").with("text", json!("gone?")))
        .await
        .unwrap();
    let next = tokio::time::timeout(Duration::from_secs(5), alice.next_event())
        .await
        .expect("disconnected client's stream should have ended");
    assert!(next.is_none());
}

/// Presence announcements after a disconnect skip the departed connection
/// without affecting anyone else.
#[tokio::test]
async fn presence_after_disconnect_reaches_survivors_only() {
    let (addr, state) = start_relay().await;

    let alice = connect(addr).await;
    let bob = connect(addr).await;
    let carol = connect(addr).await;
    wait_for_connections(&state, 3).await;

    bob.close().await.unwrap();
    wait_for_connections(&state, 2).await;

    alice.announce_online("111").await.unwrap();

    match recv(&carol).await {
        ServerEvent::UserStatusChanged(presence) => {
            assert_eq!(presence.user_id, "111");
        }
        other => panic!("expected UserStatusChanged, got {other:?}"),
    }
}

/// Reconnecting yields a fresh connection with no memberships: the client
/// is responsible for re-emitting its joins.
#[tokio::test]
async fn reconnect_starts_with_no_memberships() {
    let (addr, state) = start_relay().await;

    let alice = connect(addr).await;
    alice.join_conversation_room("111-222").await.unwrap();
    wait_for_members(&state, &conv_room("111-222"), 1).await;

    alice.close().await.unwrap();
    wait_for_connections(&state, 0).await;

    // Same user reconnects; the relay knows nothing about the old rooms.
    let alice_again = connect(addr).await;
    wait_for_connections(&state, 1).await;
    assert_eq!(state.rooms.member_count(&conv_room("111-222")).await, 0);

    // After re-emitting the join, delivery resumes.
    alice_again.join_conversation_room("111-222").await.unwrap();
    wait_for_members(&state, &conv_room("111-222"), 1).await;
}
