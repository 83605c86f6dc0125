//! End-to-end collaboration flows over real websocket connections.

use std::net::SocketAddr;
use std::time::Duration;

use storyboard_collab::{
    App, ClientError, CollabSession, Config, Cursor, Identity, Position, Role, ServerEvent,
    StaticAccess,
};
use tokio::net::TcpListener;

fn roster() -> StaticAccess {
    StaticAccess::new()
        .grant("proj-1", "alice", Role::Editor)
        .grant("proj-1", "bob", Role::Viewer)
        .grant("proj-1", "carol", Role::Owner)
        .grant("proj-2", "eve", Role::Editor)
}

fn identity(id: &str) -> Identity {
    Identity {
        id: id.into(),
        name: id.into(),
        email: format!("{id}@example.com"),
    }
}

async fn spawn_app(access: StaticAccess) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = App::new(Config::default(), access);
    tokio::spawn(async move {
        let _ = app.serve(listener).await;
    });
    addr
}

async fn connect(addr: SocketAddr, room: &str, id: &str) -> CollabSession {
    CollabSession::connect(&format!("ws://{addr}"), room, identity(id))
        .await
        .unwrap_or_else(|e| panic!("{id} failed to join {room}: {e}"))
}

/// Polls a condition until it holds or two seconds pass.
async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn cursor_moves_mirror_to_other_participants_only() {
    let addr = spawn_app(roster()).await;
    let alice = connect(addr, "proj-1", "alice").await;
    let bob = connect(addr, "proj-1", "bob").await;
    eventually("alice to see bob", || alice.online_users().len() == 2).await;

    alice
        .send_cursor_move(Cursor {
            x: 10.0,
            y: 20.0,
            scene_id: None,
        })
        .await
        .unwrap();

    eventually("bob to see alice's cursor", || {
        bob.online_users()
            .iter()
            .find(|u| u.id == "alice")
            .and_then(|u| u.cursor.as_ref().map(|c| (c.x, c.y)))
            == Some((10.0, 20.0))
    })
    .await;

    // Alice's own mirror of herself is untouched; she never receives her
    // own events back.
    let own_cursor = alice
        .online_users()
        .into_iter()
        .find(|u| u.id == "alice")
        .and_then(|u| u.cursor);
    assert!(own_cursor.is_none());
}

#[tokio::test]
async fn disconnects_shrink_the_room_and_the_last_leave_reclaims_it() {
    let addr = spawn_app(roster()).await;
    let alice = connect(addr, "proj-1", "alice").await;
    let bob = connect(addr, "proj-1", "bob").await;
    eventually("alice to see bob", || alice.online_users().len() == 2).await;

    // Scenario B: bob drops; alice's list shrinks but the room survives.
    bob.close().await;
    eventually("alice's list to drop bob", || {
        let users = alice.online_users();
        users.len() == 1 && users[0].id == "alice"
    })
    .await;

    // Scenario C: alice leaves too; a fresh join sees no leaked state.
    alice.close().await;
    let carol = connect(addr, "proj-1", "carol").await;
    eventually("carol to be alone in a fresh room", || {
        let users = carol.online_users();
        users.len() == 1 && users[0].id == "carol"
    })
    .await;
}

#[tokio::test]
async fn off_roster_joins_are_denied_without_registering() {
    let addr = spawn_app(roster()).await;

    let err = CollabSession::connect(&format!("ws://{addr}"), "proj-1", identity("mallory"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::JoinRejected(_)));

    // The denied user left no trace: the next joiner's snapshot is clean.
    let alice = connect(addr, "proj-1", "alice").await;
    let ids: Vec<_> = alice
        .online_users()
        .into_iter()
        .map(|u| u.id)
        .collect();
    assert_eq!(ids, ["alice"]);
}

#[tokio::test]
async fn events_from_one_sender_arrive_in_order() {
    let addr = spawn_app(roster()).await;
    let alice = connect(addr, "proj-1", "alice").await;
    let mut bob = connect(addr, "proj-1", "bob").await;
    let mut events = bob.events().expect("event stream");
    eventually("alice to see bob", || alice.online_users().len() == 2).await;

    for i in 0..50 {
        alice
            .send_node_move(
                "node-1",
                Position {
                    x: f64::from(i),
                    y: 0.0,
                },
            )
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    while seen.len() < 50 {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Some(ServerEvent::NodeMoved { position, .. })) => seen.push(position.x),
            Ok(Some(_)) => continue,
            Ok(None) => panic!("event stream ended early"),
            Err(_) => panic!("timed out after {} node moves", seen.len()),
        }
    }
    let expected: Vec<f64> = (0..50).map(f64::from).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn events_stay_inside_their_room() {
    let addr = spawn_app(roster()).await;
    let alice = connect(addr, "proj-1", "alice").await;
    let mut bob = connect(addr, "proj-1", "bob").await;
    let mut eve = connect(addr, "proj-2", "eve").await;
    let mut bob_events = bob.events().expect("event stream");
    let mut eve_events = eve.events().expect("event stream");
    eventually("alice to see bob", || alice.online_users().len() == 2).await;

    alice
        .send_scene_update("scene-1", serde_json::json!({ "title": "Opening shot" }))
        .await
        .unwrap();

    // Bob's receipt proves the fan-out ran; eve saw nothing.
    match tokio::time::timeout(Duration::from_secs(5), bob_events.recv()).await {
        Ok(Some(ServerEvent::SceneUpdated {
            scene_id,
            updated_by,
            ..
        })) => {
            assert_eq!(scene_id, "scene-1");
            assert_eq!(updated_by.id, "alice");
            assert_eq!(updated_by.role, Role::Editor);
        }
        other => panic!("expected scene update, got {other:?}"),
    }
    assert!(eve_events.try_recv().is_err());
    assert_eq!(eve.online_users().len(), 1);
}

#[tokio::test]
async fn rejoining_supersedes_the_previous_connection() {
    let addr = spawn_app(roster()).await;
    let bob = connect(addr, "proj-1", "bob").await;
    let alice_first = connect(addr, "proj-1", "alice").await;
    eventually("bob to see alice", || bob.online_users().len() == 2).await;

    // Alice reconnects (same identity) without closing the old transport.
    let alice_second = connect(addr, "proj-1", "alice").await;
    eventually("bob to still see exactly one alice", || {
        let users = bob.online_users();
        users.len() == 2 && users.iter().filter(|u| u.id == "alice").count() == 1
    })
    .await;

    // The stale transport closing must not tear down the fresh entry.
    alice_first.close().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let users = bob.online_users();
    assert_eq!(users.len(), 2);
    assert_eq!(users.iter().filter(|u| u.id == "alice").count(), 1);

    // Closing the live connection finally removes alice.
    alice_second.close().await;
    eventually("bob to see alice leave", || bob.online_users().len() == 1).await;
}

#[tokio::test]
async fn sends_become_no_ops_after_close() {
    let addr = spawn_app(roster()).await;
    let alice = connect(addr, "proj-1", "alice").await;
    alice.close().await;
    assert!(!alice.is_connected());

    // The contract is silence, not failure.
    alice
        .send_cursor_move(Cursor {
            x: 1.0,
            y: 2.0,
            scene_id: None,
        })
        .await
        .unwrap();
    alice.send_user_activity("typing").await.unwrap();
}
