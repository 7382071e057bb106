/// Signaling client tests against the in-process STOMP broker
///
/// Every test drives the SDK over a real WebSocket; the broker only records
/// frames and publishes what the test tells it to.
use duel_sdk::{ClientEvent, ConnectionState, Difficulty, SdkError};
use duel_test_utils::{next_event, wait_for_state, TestDuel, WAIT};
use serde_json::json;
use std::time::Duration;

// ============================================================================
// Matchmaking Flow
// ============================================================================

#[tokio::test]
async fn test_match_found_then_result() {
    let duel = TestDuel::new().await.expect("Failed to start backend");
    let (bob, mut events) = duel
        .signaling_client("bob")
        .await
        .expect("Failed to connect bob");
    let broker = &duel.server.broker;

    let delivered = broker.publish_json(
        "/topic/user/bob",
        &json!({"matchId": "m42", "opponent": "alice", "difficulty": "medium"}),
    );
    assert_eq!(delivered, 1);

    let event = next_event(&mut events, |e| matches!(e, ClientEvent::MatchFound { .. }))
        .await
        .expect("No match found event");
    let ClientEvent::MatchFound { payload, .. } = event else {
        unreachable!()
    };
    assert_eq!(payload.match_id, "m42");
    assert_eq!(payload.opponent, "alice");
    assert_eq!(payload.difficulty, Some(Difficulty::Medium));
    assert_eq!(bob.current_match().map(|m| m.match_id), Some("m42".to_string()));

    bob.subscribe_to_match(&payload.match_id)
        .expect("Failed to subscribe to match");
    broker
        .wait_for_subscribers("/topic/match/m42", 1, WAIT)
        .await
        .expect("Match subscription never reached broker");

    broker.publish_json("/topic/match/m42", &json!({"matchId": "m42", "winner": "bob"}));
    let event = next_event(&mut events, |e| matches!(e, ClientEvent::MatchResult { .. }))
        .await
        .expect("No match result event");
    let ClientEvent::MatchResult { payload, .. } = event else {
        unreachable!()
    };
    assert_eq!(payload.winner.as_deref(), Some("bob"));

    bob.clear_match_data();
    assert!(bob.current_match().is_none());
}

#[tokio::test]
async fn test_queue_actions_reach_broker() {
    let duel = TestDuel::new().await.expect("Failed to start backend");
    let (alice, _events) = duel
        .signaling_client("alice")
        .await
        .expect("Failed to connect alice");
    let broker = &duel.server.broker;

    alice.join_queue(Difficulty::Hard).expect("join_queue failed");
    alice.leave_queue().expect("leave_queue failed");
    alice.send_challenge("bob").expect("send_challenge failed");
    alice
        .submit_code("m7", "fn main() {}", "rust")
        .expect("submit_code failed");

    let joins = broker
        .wait_for_sends("/app/queue/join", 1, WAIT)
        .await
        .expect("join never arrived");
    assert_eq!(joins, vec![json!({"identity": "alice", "difficulty": "hard"})]);

    let submits = broker
        .wait_for_sends("/app/match/submit", 1, WAIT)
        .await
        .expect("submit never arrived");
    assert_eq!(
        submits,
        vec![json!({"identity": "alice", "matchId": "m7", "code": "fn main() {}", "language": "rust"})]
    );
    assert_eq!(
        broker.sent_to("/app/queue/leave"),
        vec![json!({"identity": "alice"})]
    );
    assert_eq!(
        broker.sent_to("/app/challenge/send"),
        vec![json!({"identity": "alice", "target": "bob"})]
    );
}

#[tokio::test]
async fn test_actions_refused_before_connect() {
    let duel = TestDuel::new().await.expect("Failed to start backend");
    let client = duel.signaling(TestDuel::signaling_config());

    let result = client.join_queue(Difficulty::Easy);
    assert!(matches!(result, Err(SdkError::NotConnected { .. })));
    assert_eq!(client.dropped_sends(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(duel.server.broker.accepted_connections(), 0);
}

// ============================================================================
// Subscriptions
// ============================================================================

#[tokio::test]
async fn test_match_resubscribe_delivers_once() {
    let duel = TestDuel::new().await.expect("Failed to start backend");
    let (alice, mut events) = duel
        .signaling_client("alice")
        .await
        .expect("Failed to connect alice");
    let broker = &duel.server.broker;

    alice.subscribe_to_match("m1").expect("first subscribe failed");
    alice.subscribe_to_match("m1").expect("second subscribe failed");
    alice.submit_code("m1", "x", "python").expect("submit failed");

    // The SEND follows both SUBSCRIBE/UNSUBSCRIBE frames on the wire
    broker
        .wait_for_sends("/app/match/submit", 1, WAIT)
        .await
        .expect("submit never arrived");
    assert_eq!(broker.subscriber_count("/topic/match/m1"), 1);

    assert_eq!(
        broker.publish_json("/topic/match/m1", &json!({"matchId": "m1", "winner": "alice"})),
        1
    );
    next_event(&mut events, |e| matches!(e, ClientEvent::MatchResult { .. }))
        .await
        .expect("No match result event");

    let again = tokio::time::timeout(Duration::from_millis(200), async {
        loop {
            match events.recv().await {
                Some(ClientEvent::MatchResult { .. }) => return true,
                Some(_) => continue,
                None => return false,
            }
        }
    })
    .await;
    assert!(again.is_err(), "match result delivered twice");
}

#[tokio::test]
async fn test_notifications_feed() {
    let duel = TestDuel::new().await.expect("Failed to start backend");
    let (carol, mut events) = duel
        .signaling_client("carol")
        .await
        .expect("Failed to connect carol");
    let broker = &duel.server.broker;

    carol
        .subscribe_to_notifications()
        .expect("subscribe_to_notifications failed");
    broker
        .wait_for_subscribers("/topic/notifications/carol", 1, WAIT)
        .await
        .expect("Notification subscription never reached broker");

    broker.publish_json(
        "/topic/notifications/carol",
        &json!({"type": "CHALLENGE", "message": "alice challenged you", "unreadCount": 4}),
    );
    let event = next_event(&mut events, |e| matches!(e, ClientEvent::Notification { .. }))
        .await
        .expect("No notification event");
    let ClientEvent::Notification { payload, .. } = event else {
        unreachable!()
    };
    assert_eq!(payload.kind, "CHALLENGE");
    assert_eq!(payload.unread.apply(0), 4);
}

// ============================================================================
// Connection Lifecycle
// ============================================================================

#[tokio::test]
async fn test_reconnect_after_broker_drop() {
    let duel = TestDuel::new().await.expect("Failed to start backend");
    let (alice, mut events) = duel
        .signaling_client("alice")
        .await
        .expect("Failed to connect alice");
    let broker = &duel.server.broker;

    alice.subscribe_to_match("m5").expect("subscribe failed");
    broker
        .wait_for_subscribers("/topic/match/m5", 1, WAIT)
        .await
        .expect("Match subscription never reached broker");

    broker.drop_connections();
    next_event(&mut events, |e| {
        *e == ClientEvent::StateChanged(ConnectionState::Reconnecting)
    })
    .await
    .expect("Never entered reconnecting");
    next_event(&mut events, |e| {
        *e == ClientEvent::StateChanged(ConnectionState::Connected)
    })
    .await
    .expect("Never reconnected");

    broker
        .wait_for_subscribers("/topic/user/alice", 1, WAIT)
        .await
        .expect("Personal channel not re-established");
    assert_eq!(broker.accepted_connections(), 2);
    assert_eq!(broker.subscriber_count("/topic/match/m5"), 0);
    assert!(!alice
        .active_subscriptions()
        .iter()
        .any(|topic| matches!(topic, duel_sdk::Topic::Match(_))));
}

#[tokio::test]
async fn test_binary_garbage_keeps_session() {
    let duel = TestDuel::new().await.expect("Failed to start backend");
    let (alice, mut events) = duel
        .signaling_client("alice")
        .await
        .expect("Failed to connect alice");
    let broker = &duel.server.broker;

    assert_eq!(broker.push_binary(&[0xff, 0xfe]), 1);
    let event = next_event(&mut events, |e| matches!(e, ClientEvent::Malformed { .. }))
        .await
        .expect("No malformed event");
    assert!(matches!(event, ClientEvent::Malformed { topic: None, .. }));

    broker.publish_json("/topic/user/alice", &json!({"matchId": "m8", "opponent": "bob"}));
    next_event(&mut events, |e| matches!(e, ClientEvent::MatchFound { .. }))
        .await
        .expect("No match found event after garbage");
    assert_eq!(alice.state(), ConnectionState::Connected);
    assert_eq!(broker.accepted_connections(), 1);
}

#[tokio::test]
async fn test_rejected_handshake_is_retried() {
    let duel = TestDuel::new().await.expect("Failed to start backend");
    duel.server.broker.reject_next_handshakes(1);

    let client = duel.signaling(TestDuel::signaling_config());
    client.connect("dave").expect("connect failed");
    wait_for_state(&client, ConnectionState::Connected)
        .await
        .expect("Never connected");

    assert_eq!(duel.server.broker.accepted_connections(), 2);
}

#[tokio::test]
async fn test_disconnect_closes_session() {
    let duel = TestDuel::new().await.expect("Failed to start backend");
    let (alice, _events) = duel
        .signaling_client("alice")
        .await
        .expect("Failed to connect alice");
    let broker = &duel.server.broker;

    alice.disconnect().await;
    assert_eq!(alice.state(), ConnectionState::Disconnected);
    assert!(alice.active_subscriptions().is_empty());

    tokio::time::timeout(WAIT, async {
        while broker.live_connections() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Broker connection never closed");

    let saw_disconnect = broker
        .received()
        .iter()
        .any(|received| received.frame.command == duel_sdk::stomp::Command::Disconnect);
    assert!(saw_disconnect);

    // Nothing reconnects on its own
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(broker.accepted_connections(), 1);
    alice.disconnect().await;
}

#[tokio::test]
async fn test_connect_twice_opens_one_connection() {
    let duel = TestDuel::new().await.expect("Failed to start backend");
    let (alice, _events) = duel
        .signaling_client("alice")
        .await
        .expect("Failed to connect alice");

    alice.connect("alice").expect("second connect failed");
    alice.connect("alice").expect("third connect failed");
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(duel.server.broker.accepted_connections(), 1);
    assert_eq!(alice.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_two_players_share_broker() {
    let duel = TestDuel::new().await.expect("Failed to start backend");
    let (_alice, mut alice_events) = duel
        .signaling_client("alice")
        .await
        .expect("Failed to connect alice");
    let (_bob, mut bob_events) = duel
        .signaling_client("bob")
        .await
        .expect("Failed to connect bob");
    let broker = &duel.server.broker;

    broker.publish_json("/topic/user/alice", &json!({"matchId": "m9", "opponent": "bob"}));
    broker.publish_json("/topic/user/bob", &json!({"matchId": "m9", "opponent": "alice"}));

    for (events, opponent) in [(&mut alice_events, "bob"), (&mut bob_events, "alice")] {
        let event = next_event(events, |e| matches!(e, ClientEvent::MatchFound { .. }))
            .await
            .expect("No match found event");
        let ClientEvent::MatchFound { payload, .. } = event else {
            unreachable!()
        };
        assert_eq!(payload.opponent, opponent);
    }
}
