use super::helpers::{identity, incoming, settle, start_session, Failure, FakeApi, FakeServer};
use crate::protocol::EVENT_MESSAGE_RECEIVED;
use crate::session::{ChatSession, NoticeKind};
use crate::storage::{Chat, Participant, Settings};
use crate::sync::SnapshotOutcome;
use crate::transport::{Connection, ConnectionStatus, Link};
use crate::typing::LocalTyping;
use crate::Error;
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;

fn wire(message: &crate::storage::Message) -> serde_json::Value {
    serde_json::to_value(message).expect("Failed to encode message")
}

async fn open_drained(session: &ChatSession<FakeApi>, server: &mut FakeServer, chat_id: &str) {
    assert_eq!(session.open(chat_id).await, SnapshotOutcome::Applied);
    settle().await;
    server.drain_frames();
}

#[tokio::test]
async fn test_open_joins_room_and_loads_sorted() {
    let api = FakeApi::new();
    let mut later = incoming("m2", "c1", "second");
    later.created_at = later.created_at + chrono::Duration::seconds(5);
    api.set_messages("c1", vec![later, incoming("m1", "c1", "first")]);
    let (session, mut server) = start_session(api).await;

    assert_eq!(session.open("c1").await, SnapshotOutcome::Applied);
    let (name, room) = server.next_event().await;

    assert_eq!(name, "join chat");
    assert_eq!(room, json!("c1"));
    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.active_chat.as_deref(), Some("c1"));
    let ids: Vec<&str> = snapshot.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
}

#[tokio::test]
async fn test_send_reconciles_provisional() {
    let api = FakeApi::new();
    api.confirm_with(&["m42"]);
    let gate = api.gate_send();
    let (session, mut server) = start_session(api.clone()).await;
    open_drained(&session, &mut server, "c1").await;

    session.input("Hello").await;
    let send = session
        .submit_in_background()
        .await
        .expect("Failed to start send");
    settle().await;

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.compose, "");
    assert!(snapshot.sending);
    assert_eq!(snapshot.messages.len(), 1);
    assert!(snapshot.messages[0].is_pending());
    assert_eq!(snapshot.messages[0].content, "Hello");

    gate.notify_one();
    let confirmed = send
        .await
        .expect("Send task panicked")
        .expect("Send failed");
    assert_eq!(confirmed.id, "m42");

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].id, "m42");
    assert!(!snapshot.messages[0].is_pending());
    assert!(!snapshot.sending);
    assert_eq!(api.sent(), vec![("c1".to_string(), "Hello".to_string())]);

    settle().await;
    let events = server.drain_events();
    let broadcast = events
        .iter()
        .find(|(name, _)| name == "new message")
        .expect("Confirmed message was not broadcast");
    assert_eq!(broadcast.1["_id"], "m42");

    // The server echo of our own message renders nothing new
    server.push(EVENT_MESSAGE_RECEIVED, wire(&confirmed));
    settle().await;
    assert_eq!(session.snapshot().await.messages.len(), 1);
}

#[tokio::test]
async fn test_push_before_confirmation_drops_provisional() {
    let api = FakeApi::new();
    api.confirm_with(&["m42"]);
    let gate = api.gate_send();
    let (session, mut server) = start_session(api).await;
    open_drained(&session, &mut server, "c1").await;

    session.input("Hello").await;
    let send = session.submit_in_background().await.expect("Failed to start send");
    settle().await;

    let mut pushed = incoming("m42", "c1", "Hello");
    pushed.sender = Participant::new("me", "Me");
    server.push(EVENT_MESSAGE_RECEIVED, wire(&pushed));
    settle().await;
    assert_eq!(session.snapshot().await.messages.len(), 2);

    gate.notify_one();
    send.await.expect("Send task panicked").expect("Send failed");

    let snapshot = session.snapshot().await;
    let ids: Vec<&str> = snapshot.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m42"]);
}

#[tokio::test]
async fn test_send_failure_rolls_back() {
    let api = FakeApi::new();
    api.fail_send(Some(Failure::Server));
    let (session, mut server) = start_session(api).await;
    open_drained(&session, &mut server, "c1").await;

    session.input("Hello").await;
    let result = session.submit().await;

    assert!(matches!(result, Err(Error::Api(_))));
    let snapshot = session.snapshot().await;
    assert!(snapshot.messages.is_empty());
    assert_eq!(snapshot.compose, "", "compose is not restored");
    assert_eq!(snapshot.notice.map(|n| n.kind), Some(NoticeKind::SendFailed));

    settle().await;
    assert!(!server.drain_event_names().contains(&"new message".to_string()));
}

#[tokio::test]
async fn test_unauthorized_send_expires_session() {
    let api = FakeApi::new();
    api.fail_send(Some(Failure::Unauthorized));
    let (session, mut server) = start_session(api).await;
    open_drained(&session, &mut server, "c1").await;

    session.input("Hello").await;
    assert!(matches!(session.submit().await, Err(Error::Unauthorized)));

    let notice = session.snapshot().await.notice.expect("Missing notice");
    assert_eq!(notice.kind, NoticeKind::SessionExpired);
}

#[tokio::test]
async fn test_submit_rejections_leave_state_untouched() {
    let (session, mut server) = start_session(FakeApi::new()).await;

    session.input("Hello").await;
    assert!(matches!(session.submit().await, Err(Error::NoActiveConversation)));
    assert_eq!(session.snapshot().await.compose, "Hello");

    open_drained(&session, &mut server, "c1").await;
    session.input("   ").await;
    assert!(matches!(session.submit().await, Err(Error::EmptyMessage)));
    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.compose, "   ");
    assert!(snapshot.messages.is_empty());
}

#[tokio::test]
async fn test_second_submit_waits_for_first() {
    let api = FakeApi::new();
    api.confirm_with(&["m1", "m2"]);
    let gate = api.gate_send();
    let (session, mut server) = start_session(api.clone()).await;
    open_drained(&session, &mut server, "c1").await;

    session.input("first").await;
    let first = session.submit_in_background().await.expect("Failed to start send");
    settle().await;
    session.input("second").await;
    let second = session.submit_in_background().await.expect("Failed to start send");
    settle().await;

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.messages.len(), 1, "second provisional waits for the first send");
    assert_eq!(api.sent().len(), 1);

    gate.notify_one();
    first.await.expect("Send task panicked").expect("Send failed");
    settle().await;

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.messages.len(), 2);
    assert!(snapshot.messages[1].is_pending());

    gate.notify_one();
    second.await.expect("Send task panicked").expect("Send failed");

    let snapshot = session.snapshot().await;
    let ids: Vec<&str> = snapshot.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
    assert_eq!(
        api.sent(),
        vec![
            ("c1".to_string(), "first".to_string()),
            ("c1".to_string(), "second".to_string())
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_submit_still_resolves() {
    let api = FakeApi::new();
    api.confirm_with(&["m1", "m2"]);
    let gate = api.gate_send();
    let (session, mut server) = start_session(api.clone()).await;
    open_drained(&session, &mut server, "c1").await;

    session.input("Hello").await;
    let waited = tokio::time::timeout(Duration::from_millis(50), session.submit()).await;
    assert!(waited.is_err(), "send should still be held");

    gate.notify_one();
    settle().await;

    let snapshot = session.snapshot().await;
    assert!(!snapshot.sending);
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].id, "m1");
    assert!(!snapshot.messages[0].is_pending());

    gate.notify_one();
    session.input("Again").await;
    let confirmed = session.submit().await.expect("Send failed");
    assert_eq!(confirmed.id, "m2");

    let snapshot = session.snapshot().await;
    let ids: Vec<&str> = snapshot.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
    assert!(snapshot.messages.iter().all(|m| !m.is_pending()));
}

#[tokio::test]
async fn test_push_for_background_conversation_notifies() {
    let (session, mut server) = start_session(FakeApi::new()).await;
    open_drained(&session, &mut server, "c1").await;

    let message = incoming("m9", "c2", "Are you there?");
    server.push(EVENT_MESSAGE_RECEIVED, wire(&message));
    server.push(EVENT_MESSAGE_RECEIVED, wire(&message));
    settle().await;

    let snapshot = session.snapshot().await;
    assert!(snapshot.messages.is_empty());
    assert_eq!(snapshot.notifications.len(), 1);
    assert_eq!(snapshot.notifications[0].chat_id, "c2");
    assert!(snapshot.needs_refresh);

    session.open("c2").await;
    assert!(session.snapshot().await.notifications.is_empty());
}

#[tokio::test]
async fn test_stale_fetch_is_dropped() {
    let api = FakeApi::new();
    api.set_messages("c1", vec![incoming("old", "c1", "from c1")]);
    api.set_messages("c2", vec![incoming("new", "c2", "from c2")]);
    let gate = api.gate_fetch("c1");
    let (session, _server) = start_session(api).await;

    let slow = {
        let session = session.clone();
        tokio::spawn(async move { session.open("c1").await })
    };
    settle().await;
    assert_eq!(session.open("c2").await, SnapshotOutcome::Applied);

    gate.notify_one();
    assert_eq!(slow.await.expect("Open task panicked"), SnapshotOutcome::Stale);

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.active_chat.as_deref(), Some("c2"));
    let ids: Vec<&str> = snapshot.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["new"]);
}

#[tokio::test]
async fn test_push_while_opening_survives_load() {
    let api = FakeApi::new();
    api.set_messages("c1", vec![incoming("m1", "c1", "older")]);
    let gate = api.gate_fetch("c1");
    let (session, server) = start_session(api).await;

    let opening = {
        let session = session.clone();
        tokio::spawn(async move { session.open("c1").await })
    };
    settle().await;

    let mut pushed = incoming("m2", "c1", "sent while loading");
    pushed.created_at = pushed.created_at + chrono::Duration::seconds(1);
    server.push(EVENT_MESSAGE_RECEIVED, wire(&pushed));
    settle().await;

    gate.notify_one();
    let outcome = opening.await.expect("Open task panicked");

    assert_eq!(outcome, SnapshotOutcome::Applied);
    let snapshot = session.snapshot().await;
    let ids: Vec<&str> = snapshot.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
}

#[tokio::test]
async fn test_user_load_failure_sets_notice() {
    let api = FakeApi::new();
    api.fail_fetch(Some(Failure::Server));
    let (session, _server) = start_session(api).await;

    assert_eq!(session.open("c1").await, SnapshotOutcome::Failed);

    let snapshot = session.snapshot().await;
    assert!(snapshot.messages.is_empty());
    assert_eq!(snapshot.notice.as_ref().map(|n| n.kind), Some(NoticeKind::LoadFailed));

    session.dismiss_notice().await;
    assert!(session.snapshot().await.notice.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_background_poll_merges_and_swallows_failures() {
    let api = FakeApi::new();
    api.set_messages("c1", vec![incoming("m1", "c1", "one")]);
    let (session, mut server) = start_session(api.clone()).await;
    open_drained(&session, &mut server, "c1").await;
    let poll = Settings::default().poll_interval();

    let pushed = incoming("m2", "c1", "two");
    server.push(EVENT_MESSAGE_RECEIVED, wire(&pushed));
    api.set_messages("c1", vec![incoming("m1", "c1", "one"), pushed.clone()]);
    settle().await;

    sleep(poll + Duration::from_millis(100)).await;
    let snapshot = session.snapshot().await;
    let ids: Vec<&str> = snapshot.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2"], "push and poll render once");
    assert_eq!(api.fetch_count(), 2);

    api.fail_fetch(Some(Failure::Server));
    sleep(poll).await;
    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.messages.len(), 2);
    assert!(snapshot.notice.is_none());
    assert_eq!(api.fetch_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_background_unauthorized_expires_session() {
    let api = FakeApi::new();
    let (session, mut server) = start_session(api.clone()).await;
    open_drained(&session, &mut server, "c1").await;
    api.fail_fetch(Some(Failure::Unauthorized));

    sleep(Settings::default().poll_interval() + Duration::from_millis(100)).await;

    let notice = session.snapshot().await.notice.expect("Missing notice");
    assert_eq!(notice.kind, NoticeKind::SessionExpired);
}

#[tokio::test(start_paused = true)]
async fn test_switch_cancels_previous_poll() {
    let api = FakeApi::new();
    let (session, mut server) = start_session(api.clone()).await;
    open_drained(&session, &mut server, "c1").await;
    open_drained(&session, &mut server, "c2").await;
    assert_eq!(api.fetch_count(), 2);

    sleep(Settings::default().poll_interval() + Duration::from_millis(100)).await;

    assert_eq!(api.fetch_count(), 3, "only the open conversation is polled");

    session.close_conversation().await;
    sleep(Settings::default().poll_interval() * 3).await;
    assert_eq!(api.fetch_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_typing_fixed_window() {
    let (session, mut server) = start_session(FakeApi::new()).await;
    open_drained(&session, &mut server, "c1").await;

    session.input("H").await;
    settle().await;
    assert_eq!(server.drain_event_names(), vec!["typing".to_string()]);

    sleep(Duration::from_secs(1)).await;
    session.input("He").await;
    settle().await;
    assert!(server.drain_event_names().is_empty(), "typing is emitted once");

    sleep(Duration::from_millis(2_100)).await;
    settle().await;
    let events = server.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "stop typing");
    assert_eq!(events[0].1, json!("c1"));
    assert_eq!(session.snapshot().await.local_typing, LocalTyping::Idle);

    sleep(Duration::from_millis(1_200)).await;
    settle().await;
    assert!(server.drain_event_names().is_empty(), "the later timer finds the state idle");
}

#[tokio::test(start_paused = true)]
async fn test_submit_stops_typing() {
    let (session, mut server) = start_session(FakeApi::new()).await;
    open_drained(&session, &mut server, "c1").await;

    session.input("Hello").await;
    session.submit().await.expect("Send failed");
    settle().await;

    assert_eq!(
        server.drain_event_names(),
        vec!["typing".to_string(), "stop typing".to_string(), "new message".to_string()]
    );

    sleep(Duration::from_secs(4)).await;
    settle().await;
    assert!(server.drain_event_names().is_empty());
}

#[tokio::test]
async fn test_typing_not_signaled_while_disconnected() {
    let (client, _server) = Link::pair();
    let connection = Connection::attach(client, &identity());
    let session = ChatSession::start(FakeApi::new(), connection, identity(), Settings::default());
    session.open("c1").await;

    session.input("Hello").await;

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.compose, "Hello");
    assert_eq!(snapshot.local_typing, LocalTyping::Idle);
    assert_eq!(snapshot.connection, ConnectionStatus::Connecting);
}

#[tokio::test(start_paused = true)]
async fn test_remote_typing_indicator() {
    let (session, mut server) = start_session(FakeApi::new()).await;
    open_drained(&session, &mut server, "c1").await;

    server.push("typing", json!("c2"));
    settle().await;
    assert!(!session.snapshot().await.remote_typing, "other conversations are ignored");

    server.push("typing", json!({"chatId": "c1", "userId": "u2"}));
    settle().await;
    let snapshot = session.snapshot().await;
    assert!(snapshot.remote_typing);
    assert_eq!(snapshot.remote_typists, vec!["u2".to_string()]);

    server.push("stop typing", json!({"chatId": "c1", "userId": "u2"}));
    settle().await;
    assert!(!session.snapshot().await.remote_typing);

    server.push("typing", json!("c1"));
    settle().await;
    assert!(session.snapshot().await.remote_typing);
    sleep(Duration::from_millis(5_100)).await;
    settle().await;
    assert!(!session.snapshot().await.remote_typing, "hard timeout clears the indicator");
}

#[tokio::test]
async fn test_presence_roster_replaced() {
    let (session, server) = start_session(FakeApi::new()).await;

    server.push("getUsers", json!(["u2", {"userId": "u3", "socketId": "s1"}]));
    settle().await;
    assert!(session.is_online("u2").await);
    assert!(session.is_online("u3").await);

    server.push("getUsers", json!(["u3"]));
    settle().await;
    assert!(!session.is_online("u2").await);
    assert_eq!(session.snapshot().await.online, vec!["u3".to_string()]);
}

#[tokio::test]
async fn test_connected_ack_rejoins_room() {
    let (session, mut server) = start_session(FakeApi::new()).await;
    open_drained(&session, &mut server, "c1").await;

    server.push("connected", serde_json::Value::Null);
    let (name, room) = server.next_event().await;

    assert_eq!(name, "join chat");
    assert_eq!(room, json!("c1"));
}

#[tokio::test]
async fn test_conversations_and_preview() {
    let api = FakeApi::new();
    let me = Participant::new("me", "Me");
    api.set_conversations(vec![
        Chat::direct("c1", vec![me.clone(), Participant::new("u2", "Kamala")]),
        Chat::direct("c2", vec![me, Participant::new("u3", "Sunil")]),
    ]);
    let (session, mut server) = start_session(api).await;
    session.refresh_conversations().await.expect("Failed to load conversations");
    open_drained(&session, &mut server, "c1").await;

    server.push(EVENT_MESSAGE_RECEIVED, wire(&incoming("m5", "c2", "hi from Sunil")));
    server.push(EVENT_MESSAGE_RECEIVED, wire(&incoming("m6", "c1", "hi from Kamala")));
    settle().await;

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.conversations[0].id, "c1");
    assert_eq!(
        snapshot.conversations[0].latest_message.as_ref().map(|m| m.id.as_str()),
        Some("m6")
    );
    assert_eq!(
        snapshot.conversations[1].latest_message.as_ref().map(|m| m.id.as_str()),
        Some("m5")
    );

    session.refresh_conversations().await.expect("Failed to load conversations");
    assert!(!session.snapshot().await.needs_refresh);
}

#[tokio::test]
async fn test_shutdown_stops_typing_and_disconnects() {
    let (session, mut server) = start_session(FakeApi::new()).await;
    open_drained(&session, &mut server, "c1").await;
    session.input("Hel").await;

    session.shutdown().await;
    settle().await;

    let frames = server.drain_frames();
    assert_eq!(
        frames,
        vec![
            r#"42["typing","c1"]"#.to_string(),
            r#"42["stop typing","c1"]"#.to_string(),
            "41".to_string()
        ]
    );
    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.active_chat, None);
    assert_eq!(snapshot.connection, ConnectionStatus::Disconnected);
}
