//! Integration tests for the session against an in-process STOMP server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{config, Behavior, MockServer, ServerCmd, WAIT};
use snet_realtime::session::Backoff;
use snet_realtime::stomp::{Command, Frame, HeartBeat};
use snet_realtime::{ConnectionState, Session, SessionConfig, SessionError, SharedToken};
use tokio::sync::broadcast;

fn session(config: SessionConfig, token: &SharedToken) -> Session {
    Session::new(config, Arc::new(token.clone()))
}

/// Next transition matching `predicate`, failing after [`WAIT`].
async fn next_matching(
    rx: &mut broadcast::Receiver<ConnectionState>,
    predicate: impl Fn(&ConnectionState) -> bool,
) -> ConnectionState {
    tokio::time::timeout(WAIT, async {
        loop {
            let state = rx.recv().await.expect("transition stream closed");
            if predicate(&state) {
                return state;
            }
        }
    })
    .await
    .expect("expected transition did not happen")
}

#[tokio::test]
async fn test_connect_handshake_and_replay() {
    let mut server = MockServer::start(Behavior::Accept { heartbeat: "0,0" }).await;
    let token = SharedToken::new(Some("jwt-1".to_string()));
    let session = session(config(&server), &token);
    session.subscribe("/topic/b", |_| {});
    session.subscribe("/topic/a", |_| {});
    let mut transitions = session.transitions();

    session.connect().await.unwrap();

    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(transitions.recv().await.unwrap(), ConnectionState::Connecting);
    assert_eq!(transitions.recv().await.unwrap(), ConnectionState::Connected);

    let connect = server.expect(Command::Connect).await;
    assert_eq!(connect.get("Authorization"), Some("Bearer jwt-1"));
    assert_eq!(connect.get("host"), Some("127.0.0.1"));
    assert_eq!(connect.get("heart-beat"), Some("0,0"));
    assert!(connect.get("accept-version").unwrap().contains("1.2"));

    let first = server.expect(Command::Subscribe).await;
    let second = server.expect(Command::Subscribe).await;
    assert_eq!(first.get("destination"), Some("/topic/a"));
    assert_eq!(second.get("destination"), Some("/topic/b"));
    assert_ne!(first.get("id"), second.get("id"));

    session.disconnect();
}

#[tokio::test]
async fn test_connect_is_noop_while_active() {
    let server = MockServer::start(Behavior::Accept { heartbeat: "0,0" }).await;
    let token = SharedToken::new(Some("jwt".to_string()));
    let session = session(config(&server), &token);

    session.connect().await.unwrap();
    session.connect().await.unwrap();

    assert_eq!(server.accepted(), 1);
    session.disconnect();
}

#[tokio::test]
async fn test_server_close_reconnects_and_replays() {
    let mut server = MockServer::start(Behavior::Accept { heartbeat: "0,0" }).await;
    let token = SharedToken::new(Some("jwt".to_string()));
    let session = session(config(&server), &token);
    session.subscribe("/user/queue/messages", |_| {});
    let mut transitions = session.transitions();

    session.connect().await.unwrap();
    let first_link = server.next_connection().await;
    server.expect(Command::Subscribe).await;

    first_link.send(ServerCmd::Close).unwrap();

    let reconnecting = next_matching(&mut transitions, |s| {
        matches!(s, ConnectionState::Reconnecting { .. })
    })
    .await;
    assert_eq!(
        reconnecting,
        ConnectionState::Reconnecting {
            attempt: 1,
            retry_in: Duration::from_millis(50),
        }
    );
    assert_eq!(transitions.recv().await.unwrap(), ConnectionState::Connecting);
    next_matching(&mut transitions, ConnectionState::is_connected).await;

    let replay = server.expect(Command::Subscribe).await;
    assert_eq!(replay.get("destination"), Some("/user/queue/messages"));
    assert_eq!(server.accepted(), 2);
    assert!(matches!(
        session.last_error(),
        Some(SessionError::Transport(_))
    ));

    session.disconnect();
}

#[tokio::test]
async fn test_auth_error_frame_fails_without_retry() {
    let mut server = MockServer::start(Behavior::StompError("Invalid token")).await;
    let token = SharedToken::new(Some("stale".to_string()));
    let session = session(config(&server), &token);

    let result = session.connect().await;

    assert!(matches!(result, Err(SessionError::Auth(_))));
    assert_eq!(session.state(), ConnectionState::Failed);
    server.expect(Command::Connect).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.accepted(), 1, "auth failure must not be retried");
    assert_eq!(session.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn test_upgrade_rejection_is_auth_failure() {
    let server = MockServer::start(Behavior::RejectUpgrade(401)).await;
    let token = SharedToken::new(Some("jwt".to_string()));
    let session = session(config(&server), &token);

    let result = session.connect().await;

    assert!(matches!(result, Err(SessionError::Auth(_))));
    assert_eq!(session.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn test_failed_session_recovers_on_explicit_connect() {
    let server = MockServer::start(Behavior::StompError("Unauthorized")).await;
    let token = SharedToken::new(Some("stale".to_string()));
    let session = session(config(&server), &token);

    assert!(session.connect().await.is_err());
    assert_eq!(session.state(), ConnectionState::Failed);

    server.set_behavior(Behavior::Accept { heartbeat: "0,0" });
    token.set("fresh");
    session.connect().await.unwrap();

    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(session.last_error(), None);
    session.disconnect();
}

#[tokio::test]
async fn test_transient_failure_keeps_retrying() {
    let server = MockServer::start(Behavior::StompError("broker unavailable")).await;
    let token = SharedToken::new(Some("jwt".to_string()));
    let session = session(config(&server), &token);

    // A retryable first failure is not reported to the caller.
    session.connect().await.unwrap();
    assert!(!session.state().is_connected());
    assert!(matches!(
        session.last_error(),
        Some(SessionError::Handshake(_))
    ));

    server.set_behavior(Behavior::Accept { heartbeat: "0,0" });
    let state = tokio::time::timeout(WAIT, session.wait_for(ConnectionState::is_connected))
        .await
        .unwrap();

    assert_eq!(state, ConnectionState::Connected);
    assert!(server.accepted() >= 2);
    session.disconnect();
}

#[tokio::test]
async fn test_handshake_timeout_is_retried() {
    let server = MockServer::start(Behavior::Silent).await;
    let token = SharedToken::new(Some("jwt".to_string()));
    let mut config = config(&server);
    config.handshake_timeout = Duration::from_millis(100);
    let session = session(config, &token);
    let mut transitions = session.transitions();

    session.connect().await.unwrap();

    next_matching(&mut transitions, |s| {
        matches!(s, ConnectionState::Reconnecting { .. })
    })
    .await;
    assert!(matches!(
        session.last_error(),
        Some(SessionError::Handshake(_))
    ));
    session.disconnect();
}

#[tokio::test]
async fn test_token_is_reread_on_reconnect() {
    let mut server = MockServer::start(Behavior::Accept { heartbeat: "0,0" }).await;
    let token = SharedToken::new(Some("jwt-old".to_string()));
    let session = session(config(&server), &token);
    let mut transitions = session.transitions();

    session.connect().await.unwrap();
    let link = server.next_connection().await;
    let first = server.expect(Command::Connect).await;
    assert_eq!(first.get("Authorization"), Some("Bearer jwt-old"));

    token.set("jwt-new");
    link.send(ServerCmd::Close).unwrap();
    next_matching(&mut transitions, |s| {
        matches!(s, ConnectionState::Reconnecting { .. })
    })
    .await;

    let second = server.expect(Command::Connect).await;
    assert_eq!(second.get("Authorization"), Some("Bearer jwt-new"));
    session.disconnect();
}

#[tokio::test]
async fn test_missing_token_on_reconnect_fails() {
    let mut server = MockServer::start(Behavior::Accept { heartbeat: "0,0" }).await;
    let token = SharedToken::new(Some("jwt".to_string()));
    let session = session(config(&server), &token);
    let mut transitions = session.transitions();

    session.connect().await.unwrap();
    let link = server.next_connection().await;

    token.clear();
    link.send(ServerCmd::Close).unwrap();

    next_matching(&mut transitions, |s| *s == ConnectionState::Failed).await;
    assert!(matches!(session.last_error(), Some(SessionError::Auth(_))));
}

#[tokio::test]
async fn test_publish_requires_connection() {
    let mut server = MockServer::start(Behavior::Accept { heartbeat: "0,0" }).await;
    let token = SharedToken::new(Some("jwt".to_string()));
    let session = session(config(&server), &token);
    let payload = serde_json::json!({ "receiverId": 2, "content": "hello" });

    assert_eq!(
        session.publish("/app/chat.send", &payload),
        Err(SessionError::NotConnected)
    );

    session.connect().await.unwrap();
    session.publish("/app/chat.send", &payload).unwrap();

    let send = server.expect(Command::Send).await;
    assert_eq!(send.get("destination"), Some("/app/chat.send"));
    assert_eq!(send.get("content-type"), Some("application/json"));
    let body: serde_json::Value = serde_json::from_str(&send.body).unwrap();
    assert_eq!(body, payload);

    session.disconnect();
    assert_eq!(
        session.publish("/app/chat.send", &payload),
        Err(SessionError::NotConnected)
    );
}

#[tokio::test]
async fn test_publish_keeps_call_order() {
    let mut server = MockServer::start(Behavior::Accept { heartbeat: "0,0" }).await;
    let token = SharedToken::new(Some("jwt".to_string()));
    let session = session(config(&server), &token);
    session.connect().await.unwrap();

    for n in 0..5 {
        session.publish("/app/chat.send", &serde_json::json!({ "n": n })).unwrap();
    }

    for n in 0..5 {
        let send = server.expect(Command::Send).await;
        let body: serde_json::Value = serde_json::from_str(&send.body).unwrap();
        assert_eq!(body["n"], n);
    }
    session.disconnect();
}

#[tokio::test]
async fn test_inbound_message_reaches_handler() {
    let mut server = MockServer::start(Behavior::Accept { heartbeat: "0,0" }).await;
    let token = SharedToken::new(Some("jwt".to_string()));
    let session = session(config(&server), &token);
    let (_handle, mut inbox) = session.subscribe_channel("/user/queue/messages");

    session.connect().await.unwrap();
    let link = server.next_connection().await;
    let subscribe = server.expect(Command::Subscribe).await;
    let binding = subscribe.get("id").unwrap().to_string();

    let message = Frame::new(Command::Message)
        .header("destination", "/user/queue/messages")
        .header("subscription", binding)
        .header("message-id", "m-1")
        .body(r#"{"senderId":7,"receiverId":1,"content":"hi"}"#);
    link.send(ServerCmd::Send(message)).unwrap();

    let received = tokio::time::timeout(WAIT, inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.topic, "/user/queue/messages");
    assert_eq!(received.sender_id, Some(7));
    assert_eq!(received.content, "hi");
    assert_eq!(received.message_id.as_deref(), Some("m-1"));

    session.disconnect();
}

#[tokio::test]
async fn test_malformed_message_does_not_drop_link() {
    let mut server = MockServer::start(Behavior::Accept { heartbeat: "0,0" }).await;
    let token = SharedToken::new(Some("jwt".to_string()));
    let session = session(config(&server), &token);
    let (_handle, mut inbox) = session.subscribe_channel("/topic/online-users");

    session.connect().await.unwrap();
    let link = server.next_connection().await;
    server.expect(Command::Subscribe).await;

    let bad = Frame::new(Command::Message)
        .header("destination", "/topic/online-users")
        .body("not json");
    let good = Frame::new(Command::Message)
        .header("destination", "/topic/online-users")
        .body(r#"["a@example.com"]"#);
    link.send(ServerCmd::Send(bad)).unwrap();
    link.send(ServerCmd::Send(good)).unwrap();

    let received = tokio::time::timeout(WAIT, inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.online_users().unwrap(), vec!["a@example.com"]);
    assert_eq!(session.state(), ConnectionState::Connected);

    session.disconnect();
}

#[tokio::test]
async fn test_subscribe_and_unsubscribe_while_connected() {
    let mut server = MockServer::start(Behavior::Accept { heartbeat: "0,0" }).await;
    let token = SharedToken::new(Some("jwt".to_string()));
    let session = session(config(&server), &token);
    session.connect().await.unwrap();

    let handle = session.subscribe("/topic/news", |_| {});
    let subscribe = server.expect(Command::Subscribe).await;
    assert_eq!(subscribe.get("destination"), Some("/topic/news"));

    handle.unsubscribe();
    let unsubscribe = server.expect(Command::Unsubscribe).await;
    assert_eq!(unsubscribe.get("id"), subscribe.get("id"));
    assert!(session.topics().is_empty());

    session.disconnect();
}

#[tokio::test]
async fn test_heartbeat_silence_drops_link() {
    let server = MockServer::start(Behavior::Accept { heartbeat: "50,0" }).await;
    let token = SharedToken::new(Some("jwt".to_string()));
    let mut config = config(&server);
    config.heartbeat = HeartBeat::new(Duration::ZERO, Duration::from_millis(50));
    config.missed_heartbeats = 2;
    config.backoff = Backoff::fixed(Duration::from_secs(10));
    let session = session(config, &token);
    let mut transitions = session.transitions();

    session.connect().await.unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);

    next_matching(&mut transitions, |s| {
        matches!(s, ConnectionState::Reconnecting { .. })
    })
    .await;
    match session.last_error() {
        Some(SessionError::Transport(reason)) => assert!(reason.contains("heart-beat")),
        other => panic!("expected a transport error, got {other:?}"),
    }
    session.disconnect();
}

#[tokio::test]
async fn test_client_sends_heartbeats() {
    let mut server = MockServer::start(Behavior::Accept { heartbeat: "0,50" }).await;
    let token = SharedToken::new(Some("jwt".to_string()));
    let mut config = config(&server);
    config.heartbeat = HeartBeat::new(Duration::from_millis(50), Duration::ZERO);
    let session = session(config, &token);

    session.connect().await.unwrap();
    server.expect(Command::Connect).await;

    // Heart-beats are bare EOLs and decode to no frames; the link staying up
    // for several intervals with the server reading is what matters here.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(server.accepted(), 1);
    session.disconnect();
}

#[tokio::test]
async fn test_close_flushes_published_frames_first() {
    let mut server = MockServer::start(Behavior::Accept { heartbeat: "0,0" }).await;
    let token = SharedToken::new(Some("jwt".to_string()));
    let session = session(config(&server), &token);
    session.connect().await.unwrap();

    for n in 0..3 {
        session.publish("/app/chat.send", &serde_json::json!({ "n": n })).unwrap();
    }
    session.close().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);

    for n in 0..3 {
        let send = server.expect(Command::Send).await;
        let body: serde_json::Value = serde_json::from_str(&send.body).unwrap();
        assert_eq!(body["n"], n);
    }
    server.expect(Command::Disconnect).await;

    session.close().await;
}

#[tokio::test]
async fn test_disconnect_sends_disconnect_frame() {
    let mut server = MockServer::start(Behavior::Accept { heartbeat: "0,0" }).await;
    let token = SharedToken::new(Some("jwt".to_string()));
    let session = session(config(&server), &token);
    let mut transitions = session.transitions();

    session.connect().await.unwrap();
    session.disconnect();

    server.expect(Command::Disconnect).await;
    next_matching(&mut transitions, |s| *s == ConnectionState::Disconnected).await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_cancels_pending_reconnect() {
    let mut server = MockServer::start(Behavior::Accept { heartbeat: "0,0" }).await;
    let token = SharedToken::new(Some("jwt".to_string()));
    let mut config = config(&server);
    config.backoff = Backoff::fixed(Duration::from_millis(300));
    let session = session(config, &token);
    let mut transitions = session.transitions();

    session.connect().await.unwrap();
    server.next_connection().await.send(ServerCmd::Close).unwrap();
    next_matching(&mut transitions, |s| {
        matches!(s, ConnectionState::Reconnecting { .. })
    })
    .await;

    session.disconnect();
    assert_eq!(session.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(server.accepted(), 1, "no attempt after disconnect");
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_subscriptions_survive_disconnect_and_connect() {
    let mut server = MockServer::start(Behavior::Accept { heartbeat: "0,0" }).await;
    let token = SharedToken::new(Some("jwt".to_string()));
    let session = session(config(&server), &token);
    session.subscribe("/topic/online-users", |_| {});

    session.connect().await.unwrap();
    server.expect(Command::Subscribe).await;
    session.disconnect();

    session.connect().await.unwrap();
    let replay = server.expect(Command::Subscribe).await;
    assert_eq!(replay.get("destination"), Some("/topic/online-users"));
    assert_eq!(replay.get("id"), Some("sub-0"));

    session.disconnect();
}

#[tokio::test]
async fn test_revoke_credentials_while_connected() {
    let server = MockServer::start(Behavior::Accept { heartbeat: "0,0" }).await;
    let token = SharedToken::new(Some("jwt".to_string()));
    let session = session(config(&server), &token);

    session.connect().await.unwrap();
    session.revoke_credentials();

    assert_eq!(session.state(), ConnectionState::Failed);
    assert!(matches!(session.last_error(), Some(SessionError::Auth(_))));
    assert_eq!(
        session.publish("/app/chat.send", &serde_json::json!({})),
        Err(SessionError::NotConnected)
    );
}
