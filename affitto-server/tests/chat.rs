//! Messaging subsystem tests: store invariants, registry semantics and the
//! end-to-end delivery flows, driven through `chat::handle_event` with
//! channel-backed connection handles.

use affitto_core::{now_micros, ClientEvent, GetMessages, Role, SendMessage, User};
use affitto_server::chat::handle_event;
use affitto_server::error::ChatError;
use affitto_server::registry::ConnHandle;
use affitto_server::store::NewMessage;
use affitto_server::{connect_pool, run_migrations, sqlite_url_for_path, AppState};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

async fn setup() -> (TempDir, AppState) {
    let td = TempDir::new().expect("tempdir");
    let url = sqlite_url_for_path(&td.path().join("affitto.db")).expect("sqlite url");
    let pool = connect_pool(&url).await.expect("connect");
    run_migrations(&pool).await.expect("migrations");
    let state = AppState::new(pool, td.path().join("uploads"));
    (td, state)
}

async fn insert_user(state: &AppState, id: &str, name: &str) {
    sqlx::query(
        "INSERT INTO users (user_id, name, email, password_hash, role, created_at) \
         VALUES (?, ?, ?, 'x', 'tenant', '2025-01-01T00:00:00Z')",
    )
    .bind(id)
    .bind(name)
    .bind(format!("{}@example.com", id))
    .execute(&state.pool)
    .await
    .expect("insert user");
}

fn wire_user(id: &str, name: &str) -> User {
    User {
        user_id: id.to_string(),
        name: name.to_string(),
        email: format!("{}@example.com", id),
        role: Role::Tenant,
        phone: None,
    }
}

fn conn() -> (ConnHandle, UnboundedReceiver<String>) {
    let (tx, rx) = unbounded_channel();
    (ConnHandle::new(tx), rx)
}

fn next_event(rx: &mut UnboundedReceiver<String>) -> Value {
    let raw = rx.try_recv().expect("expected a queued event");
    serde_json::from_str(&raw).expect("valid json event")
}

fn assert_no_event(rx: &mut UnboundedReceiver<String>) {
    assert!(rx.try_recv().is_err(), "no further events expected");
}

fn send(property: &str, from: &str, to: &str, body: &str) -> ClientEvent {
    ClientEvent::SendMessage(SendMessage {
        property_id: property.to_string(),
        sender_id: from.to_string(),
        receiver_id: to.to_string(),
        message: body.to_string(),
    })
}

// ---- Message store invariants ----

#[tokio::test]
async fn append_assigns_strictly_increasing_timestamps() {
    let (_td, state) = setup().await;
    insert_user(&state, "alice", "Alice").await;
    insert_user(&state, "bob", "Bob").await;

    for body in ["one", "two", "three"] {
        state
            .store
            .append(NewMessage {
                property_id: "L1".to_string(),
                sender_id: "alice".to_string(),
                receiver_id: "bob".to_string(),
                body: body.to_string(),
            })
            .await
            .expect("append");
    }

    let stamps: Vec<i64> = sqlx::query_scalar("SELECT created_at FROM messages ORDER BY rowid")
        .fetch_all(&state.pool)
        .await
        .expect("read timestamps");
    assert_eq!(stamps.len(), 3);
    assert!(stamps[0] < stamps[1] && stamps[1] < stamps[2]);
}

#[tokio::test]
async fn concurrent_appends_do_not_collide_on_timestamps() {
    let (_td, state) = setup().await;
    insert_user(&state, "alice", "Alice").await;
    insert_user(&state, "bob", "Bob").await;

    // seed the thread with a timestamp ahead of the clock so both appends
    // must bump past the same partition max
    let ahead = now_micros() + 60_000_000;
    sqlx::query(
        "INSERT INTO messages (message_id, property_id, sender_id, receiver_id, body, created_at, delivered) \
         VALUES ('m0', 'L1', 'alice', 'bob', 'seed', ?, 0)",
    )
    .bind(ahead)
    .execute(&state.pool)
    .await
    .expect("seed message");

    let first = state.store.append(NewMessage {
        property_id: "L1".to_string(),
        sender_id: "alice".to_string(),
        receiver_id: "bob".to_string(),
        body: "first".to_string(),
    });
    let second = state.store.append(NewMessage {
        property_id: "L1".to_string(),
        sender_id: "bob".to_string(),
        receiver_id: "alice".to_string(),
        body: "second".to_string(),
    });
    let (first, second) = tokio::join!(first, second);
    first.expect("first append");
    second.expect("second append");

    let stamps: Vec<i64> =
        sqlx::query_scalar("SELECT created_at FROM messages ORDER BY created_at")
            .fetch_all(&state.pool)
            .await
            .expect("read timestamps");
    assert_eq!(stamps.len(), 3);
    assert_eq!(stamps[0], ahead);
    assert!(
        stamps[0] < stamps[1] && stamps[1] < stamps[2],
        "interleaved appends must not share a timestamp"
    );
}

#[tokio::test]
async fn append_rejects_empty_body() {
    let (_td, state) = setup().await;
    insert_user(&state, "alice", "Alice").await;
    insert_user(&state, "bob", "Bob").await;

    for body in ["", "   "] {
        let err = state
            .store
            .append(NewMessage {
                property_id: "L1".to_string(),
                sender_id: "alice".to_string(),
                receiver_id: "bob".to_string(),
                body: body.to_string(),
            })
            .await
            .expect_err("empty body must be rejected");
        assert!(matches!(err, ChatError::Validation(_)));
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
        .fetch_one(&state.pool)
        .await
        .expect("count");
    assert_eq!(count, 0, "nothing may be stored");
}

#[tokio::test]
async fn append_rejects_self_addressed_message() {
    let (_td, state) = setup().await;
    insert_user(&state, "alice", "Alice").await;

    let err = state
        .store
        .append(NewMessage {
            property_id: "L1".to_string(),
            sender_id: "alice".to_string(),
            receiver_id: "alice".to_string(),
            body: "hi me".to_string(),
        })
        .await
        .expect_err("self-addressed message must be rejected");
    assert!(matches!(err, ChatError::Validation(_)));
}

#[tokio::test]
async fn query_thread_is_symmetric_and_ordered() {
    let (_td, state) = setup().await;
    insert_user(&state, "alice", "Alice").await;
    insert_user(&state, "bob", "Bob").await;
    insert_user(&state, "carol", "Carol").await;

    for (from, to, body) in [
        ("alice", "bob", "one"),
        ("bob", "alice", "two"),
        ("alice", "bob", "three"),
        // different pair, same listing: must not leak into the thread
        ("alice", "carol", "other"),
    ] {
        state
            .store
            .append(NewMessage {
                property_id: "L1".to_string(),
                sender_id: from.to_string(),
                receiver_id: to.to_string(),
                body: body.to_string(),
            })
            .await
            .expect("append");
    }

    let ab = state.store.query_thread("L1", "alice", "bob").await.unwrap();
    let ba = state.store.query_thread("L1", "bob", "alice").await.unwrap();
    assert_eq!(ab, ba, "argument order must not matter");

    let bodies: Vec<&str> = ab.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["one", "two", "three"]);
    assert_eq!(ab[0].sender_name, "Alice");
    assert_eq!(ab[1].sender_name, "Bob");
}

// ---- Connection registry semantics ----

#[tokio::test]
async fn unregister_is_idempotent() {
    let (_td, state) = setup().await;
    let (c1, _rx1) = conn();

    state.registry.register("alice", c1.clone());
    assert!(state.registry.lookup("alice").is_some());

    state.registry.unregister(&c1);
    assert!(state.registry.lookup("alice").is_none());

    // second unregister of the same handle is a no-op
    state.registry.unregister(&c1);
    assert!(state.registry.lookup("alice").is_none());
    assert!(state.registry.is_empty());

    // a never-registered handle is a no-op too
    let (c2, _rx2) = conn();
    state.registry.unregister(&c2);
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn stale_disconnect_does_not_evict_fresh_connection() {
    let (_td, state) = setup().await;
    let (c1, _rx1) = conn();
    let (c2, _rx2) = conn();

    state.registry.register("alice", c1.clone());
    // reconnect: last registration wins
    state.registry.register("alice", c2.clone());
    assert_eq!(state.registry.lookup("alice").unwrap().conn_id, c2.conn_id);

    // the old connection's disconnect arrives late
    state.registry.unregister(&c1);
    assert_eq!(
        state.registry.lookup("alice").unwrap().conn_id,
        c2.conn_id,
        "fresh mapping must survive a stale disconnect"
    );

    state.registry.unregister(&c2);
    assert!(state.registry.lookup("alice").is_none());
}

// ---- Delivery flows through handle_event ----

#[tokio::test]
async fn offline_receiver_message_is_acked_and_surfaced_via_history() {
    let (_td, state) = setup().await;
    insert_user(&state, "alice", "Alice").await;
    insert_user(&state, "bob", "Bob").await;

    let alice = wire_user("alice", "Alice");
    let (c1, mut rx1) = conn();
    handle_event(&state, &alice, &c1, ClientEvent::UserConnected("alice".into())).await;

    // bob has no live connection
    handle_event(&state, &alice, &c1, send("L1", "alice", "bob", "Hi")).await;

    let ev = next_event(&mut rx1);
    assert_eq!(ev["type"], "message_sent");
    assert_eq!(ev["payload"]["body"], "Hi");
    assert_eq!(ev["payload"]["senderName"], "Alice");
    assert_eq!(ev["payload"]["receiverName"], "Bob");
    assert_eq!(ev["payload"]["delivered"], false);
    assert!(ev["payload"]["messageId"].is_string());
    assert_no_event(&mut rx1);

    // bob connects later and loads the thread
    let bob = wire_user("bob", "Bob");
    let (c2, mut rx2) = conn();
    handle_event(&state, &bob, &c2, ClientEvent::UserConnected("bob".into())).await;
    handle_event(
        &state,
        &bob,
        &c2,
        ClientEvent::GetMessages(GetMessages {
            property_id: "L1".into(),
            user_id_1: "alice".into(),
            user_id_2: "bob".into(),
        }),
    )
    .await;

    let ev = next_event(&mut rx2);
    assert_eq!(ev["type"], "messages_history");
    let history = ev["payload"].as_array().expect("array payload");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["body"], "Hi");
    assert_no_event(&mut rx2);
}

#[tokio::test]
async fn online_receiver_gets_live_push_and_sender_gets_ack() {
    let (_td, state) = setup().await;
    insert_user(&state, "alice", "Alice").await;
    insert_user(&state, "bob", "Bob").await;

    let alice = wire_user("alice", "Alice");
    let bob = wire_user("bob", "Bob");
    let (c1, mut rx1) = conn();
    let (c2, mut rx2) = conn();
    handle_event(&state, &alice, &c1, ClientEvent::UserConnected("alice".into())).await;
    handle_event(&state, &bob, &c2, ClientEvent::UserConnected("bob".into())).await;

    handle_event(&state, &alice, &c1, send("L1", "alice", "bob", "Hi again")).await;

    let pushed = next_event(&mut rx2);
    assert_eq!(pushed["type"], "new_message");
    assert_eq!(pushed["payload"]["body"], "Hi again");
    assert_no_event(&mut rx2);

    let ack = next_event(&mut rx1);
    assert_eq!(ack["type"], "message_sent");
    assert_eq!(ack["payload"]["messageId"], pushed["payload"]["messageId"]);
    assert_no_event(&mut rx1);

    // the delivered flag was set after the successful push
    let delivered: i64 = sqlx::query_scalar("SELECT delivered FROM messages")
        .fetch_one(&state.pool)
        .await
        .expect("read flag");
    assert_eq!(delivered, 1);
    assert_eq!(ack["payload"]["delivered"], true);
}

#[tokio::test]
async fn empty_body_send_yields_message_error_and_stores_nothing() {
    let (_td, state) = setup().await;
    insert_user(&state, "alice", "Alice").await;
    insert_user(&state, "bob", "Bob").await;

    let alice = wire_user("alice", "Alice");
    let (c1, mut rx1) = conn();
    handle_event(&state, &alice, &c1, ClientEvent::UserConnected("alice".into())).await;
    handle_event(&state, &alice, &c1, send("L1", "alice", "bob", "")).await;

    let ev = next_event(&mut rx1);
    assert_eq!(ev["type"], "message_error");
    assert_eq!(ev["payload"]["error"]["code"], "validation_error");
    assert_no_event(&mut rx1);

    let thread = state.store.query_thread("L1", "alice", "bob").await.unwrap();
    assert!(thread.is_empty(), "failed send must not be stored");
}

#[tokio::test]
async fn disconnected_receiver_catches_up_after_reconnect() {
    let (_td, state) = setup().await;
    insert_user(&state, "alice", "Alice").await;
    insert_user(&state, "bob", "Bob").await;

    let alice = wire_user("alice", "Alice");
    let bob = wire_user("bob", "Bob");

    let (c1, mut rx1) = conn();
    let (c2, mut rx2) = conn();
    handle_event(&state, &alice, &c1, ClientEvent::UserConnected("alice".into())).await;
    handle_event(&state, &bob, &c2, ClientEvent::UserConnected("bob".into())).await;

    // alice goes away
    state.registry.unregister(&c1);

    handle_event(&state, &bob, &c2, send("L1", "bob", "alice", "are you there?")).await;

    let ack = next_event(&mut rx2);
    assert_eq!(ack["type"], "message_sent");
    assert_eq!(ack["payload"]["delivered"], false);
    assert_no_event(&mut rx1); // no push went to the dead session

    // alice reconnects with a fresh handle and loads the thread
    let (c3, mut rx3) = conn();
    handle_event(&state, &alice, &c3, ClientEvent::UserConnected("alice".into())).await;
    handle_event(
        &state,
        &alice,
        &c3,
        ClientEvent::GetMessages(GetMessages {
            property_id: "L1".into(),
            user_id_1: "alice".into(),
            user_id_2: "bob".into(),
        }),
    )
    .await;

    let ev = next_event(&mut rx3);
    assert_eq!(ev["type"], "messages_history");
    assert_eq!(ev["payload"][0]["body"], "are you there?");
}

#[tokio::test]
async fn spoofed_sender_id_is_rejected() {
    let (_td, state) = setup().await;
    insert_user(&state, "alice", "Alice").await;
    insert_user(&state, "bob", "Bob").await;

    let alice = wire_user("alice", "Alice");
    let (c1, mut rx1) = conn();
    handle_event(&state, &alice, &c1, ClientEvent::UserConnected("alice".into())).await;

    // alice tries to send as bob
    handle_event(&state, &alice, &c1, send("L1", "bob", "alice", "gotcha")).await;

    let ev = next_event(&mut rx1);
    assert_eq!(ev["type"], "message_error");
    assert_eq!(ev["payload"]["error"]["code"], "identity_mismatch");

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
        .fetch_one(&state.pool)
        .await
        .expect("count");
    assert_eq!(count, 0);
}

#[tokio::test]
async fn user_connected_with_foreign_id_does_not_register() {
    let (_td, state) = setup().await;
    insert_user(&state, "alice", "Alice").await;

    let alice = wire_user("alice", "Alice");
    let (c1, mut rx1) = conn();
    handle_event(&state, &alice, &c1, ClientEvent::UserConnected("bob".into())).await;

    let ev = next_event(&mut rx1);
    assert_eq!(ev["type"], "message_error");
    assert_eq!(ev["payload"]["error"]["code"], "identity_mismatch");
    assert!(state.registry.is_empty());
}
