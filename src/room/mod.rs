pub mod error;
pub mod event;
pub mod presence;
pub mod registry;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use event::ServerEvent;
use presence::{Attribution, Cursor, Identity, Participant, Role, is_active_activity};

/// Rooms are keyed by the project id of the storyboard being edited.
pub type RoomId = String;
/// Participants are keyed by the stable user id from the identity provider,
/// so a reconnecting user is perceived as the same identity rejoining.
pub type UserId = String;
/// Distinguishes successive connections by the same user.
pub type ConnId = Uuid;

/// Handle the gateway hands to a room so events can be pushed to one
/// connection without ever blocking the sender.
pub type EventSink = mpsc::UnboundedSender<ServerEvent>;

pub(crate) const DEFAULT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug)]
struct ParticipantState {
    profile: Participant,
    conn_id: ConnId,
    join_seq: u64,
    forwarder: JoinHandle<()>,
}

/// The live collaboration context for one project. Exists only while at
/// least one participant is connected; owned exclusively by the
/// [`registry::RoomRegistry`].
#[derive(Debug)]
pub struct Room {
    /// Fan-out channel. Every participant's forwarder task subscribes here
    /// and copies events into that connection's sink, skipping events the
    /// participant originated.
    sender: broadcast::Sender<ServerEvent>,
    participants: RwLock<HashMap<UserId, ParticipantState>>,
    join_seq: AtomicU64,
    last_activity: RwLock<DateTime<Utc>>,
}

impl Room {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Room {
            sender,
            participants: RwLock::new(HashMap::new()),
            join_seq: AtomicU64::new(0),
            last_activity: RwLock::new(Utc::now()),
        }
    }

    /// Registers a participant and wires up their fan-out.
    ///
    /// A second join under the same user id supersedes the first: the old
    /// entry's forwarder is aborted and the entry replaced, so the map never
    /// holds two entries for one identity. The join-ordered snapshot is
    /// pushed to the joiner's own sink before the join event is published to
    /// the rest of the room.
    pub(crate) async fn add_participant(
        &self,
        identity: Identity,
        role: Role,
        conn_id: ConnId,
        sink: EventSink,
    ) -> Vec<Participant> {
        let mut participants = self.participants.write().await;

        if let Some(old) = participants.remove(&identity.id) {
            tracing::debug!(user_id = %identity.id, "superseding previous connection");
            old.forwarder.abort();
        }

        // Subscribe before publishing the join event so the forwarder sees
        // everything broadcast after the snapshot.
        let room_receiver = self.sender.subscribe();
        let profile = Participant::new(identity, role);
        let user_id = profile.id.clone();
        let forwarder = spawn_forwarder(user_id.clone(), room_receiver, sink.clone());

        participants.insert(
            user_id,
            ParticipantState {
                profile: profile.clone(),
                conn_id,
                join_seq: self.join_seq.fetch_add(1, Ordering::Relaxed),
                forwarder,
            },
        );

        let snapshot = ordered_snapshot(&participants);
        drop(participants);
        self.touch_room().await;

        let _ = sink.send(ServerEvent::OnlineUsers {
            users: snapshot.clone(),
        });
        self.broadcast(ServerEvent::UserJoined {
            user: profile,
            online_users: snapshot.clone(),
        });

        snapshot
    }

    /// Removes a participant, but only if `conn_id` still owns the entry:
    /// a stale transport closing after its user already rejoined must not
    /// tear down the fresh entry. Returns the updated snapshot on removal.
    pub(crate) async fn remove_participant(
        &self,
        user_id: &UserId,
        conn_id: ConnId,
    ) -> Option<Vec<Participant>> {
        let mut participants = self.participants.write().await;
        match participants.get(user_id) {
            Some(state) if state.conn_id == conn_id => {}
            _ => return None,
        }
        if let Some(state) = participants.remove(user_id) {
            state.forwarder.abort();
        }
        let snapshot = ordered_snapshot(&participants);
        drop(participants);
        self.touch_room().await;

        self.broadcast(ServerEvent::UserLeft {
            user_id: user_id.clone(),
            online_users: snapshot.clone(),
        });
        Some(snapshot)
    }

    /// Moves a participant's live cursor. No-op (false) once the
    /// participant has been removed.
    pub(crate) async fn update_cursor(&self, user_id: &UserId, cursor: Cursor) -> bool {
        let mut participants = self.participants.write().await;
        let Some(state) = participants.get_mut(user_id) else {
            return false;
        };
        state.profile.cursor = Some(cursor);
        state.profile.last_seen = Utc::now();
        drop(participants);
        self.touch_room().await;
        true
    }

    /// Refreshes `last_seen` on any inbound activity and returns the
    /// sender's attribution for relaying. No-op after removal.
    pub(crate) async fn touch(&self, user_id: &UserId) -> Option<Attribution> {
        let mut participants = self.participants.write().await;
        let state = participants.get_mut(user_id)?;
        state.profile.last_seen = Utc::now();
        let attribution = state.profile.attribution();
        drop(participants);
        self.touch_room().await;
        Some(attribution)
    }

    /// `touch` plus the activity string's effect on the active flag.
    pub(crate) async fn record_activity(
        &self,
        user_id: &UserId,
        activity: &str,
    ) -> Option<Attribution> {
        let mut participants = self.participants.write().await;
        let state = participants.get_mut(user_id)?;
        state.profile.last_seen = Utc::now();
        state.profile.is_active = is_active_activity(activity);
        let attribution = state.profile.attribution();
        drop(participants);
        self.touch_room().await;
        Some(attribution)
    }

    /// Join-ordered, point-in-time view of the room's participants.
    pub async fn snapshot(&self) -> Vec<Participant> {
        ordered_snapshot(&*self.participants.read().await)
    }

    pub async fn participant_count(&self) -> usize {
        self.participants.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.participants.read().await.is_empty()
    }

    pub async fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.read().await
    }

    /// Publishes an event to every subscribed forwarder. Returns how many
    /// receivers saw it; a room whose only member is the origin yields zero,
    /// which is not an error.
    pub(crate) fn broadcast(&self, event: ServerEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    async fn touch_room(&self) {
        *self.last_activity.write().await = Utc::now();
    }

    /// Aborts all forwarders. Used when the registry discards the room.
    pub(crate) async fn clear(&self) {
        let mut participants = self.participants.write().await;
        for (_, state) in participants.drain() {
            state.forwarder.abort();
        }
    }
}

fn ordered_snapshot(participants: &HashMap<UserId, ParticipantState>) -> Vec<Participant> {
    let mut entries: Vec<_> = participants.values().collect();
    entries.sort_by_key(|state| state.join_seq);
    entries.iter().map(|state| state.profile.clone()).collect()
}

/// Copies room events into one connection's sink. Fire-and-forget: the
/// sink is unbounded so a slow websocket never backpressures the room, and
/// a dead sink just ends the task. Lagging behind the channel drops the
/// missed events and carries on; they are not replayed.
fn spawn_forwarder(
    user_id: UserId,
    mut room_receiver: broadcast::Receiver<ServerEvent>,
    sink: EventSink,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match room_receiver.recv().await {
                Ok(event) => {
                    if event.origin() == Some(user_id.as_str()) {
                        continue;
                    }
                    if sink.send(event).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(%user_id, skipped, "participant lagged behind room fan-out");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str, name: &str) -> Identity {
        Identity {
            id: id.into(),
            name: name.into(),
            email: format!("{id}@example.com"),
        }
    }

    fn sink() -> (EventSink, mpsc::UnboundedReceiver<ServerEvent>) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn snapshot_is_join_ordered() {
        let room = Room::new(DEFAULT_CHANNEL_CAPACITY);
        let (tx_a, _rx_a) = sink();
        let (tx_b, _rx_b) = sink();
        room.add_participant(identity("alice", "Alice"), Role::Owner, Uuid::new_v4(), tx_a)
            .await;
        let snapshot = room
            .add_participant(identity("bob", "Bob"), Role::Editor, Uuid::new_v4(), tx_b)
            .await;
        let ids: Vec<_> = snapshot.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["alice", "bob"]);
    }

    #[tokio::test]
    async fn joiner_receives_snapshot_before_anything_else() {
        let room = Room::new(DEFAULT_CHANNEL_CAPACITY);
        let (tx, mut rx) = sink();
        room.add_participant(identity("alice", "Alice"), Role::Owner, Uuid::new_v4(), tx)
            .await;
        match rx.recv().await {
            Some(ServerEvent::OnlineUsers { users }) => {
                assert_eq!(users.len(), 1);
                assert_eq!(users[0].id, "alice");
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fan_out_skips_the_origin() {
        let room = Room::new(DEFAULT_CHANNEL_CAPACITY);
        let (tx_a, mut rx_a) = sink();
        let (tx_b, mut rx_b) = sink();
        room.add_participant(identity("alice", "Alice"), Role::Owner, Uuid::new_v4(), tx_a)
            .await;
        room.add_participant(identity("bob", "Bob"), Role::Editor, Uuid::new_v4(), tx_b)
            .await;

        // Drain alice's snapshot and bob's join as seen by alice.
        assert!(matches!(
            rx_a.recv().await,
            Some(ServerEvent::OnlineUsers { .. })
        ));
        assert!(matches!(
            rx_a.recv().await,
            Some(ServerEvent::UserJoined { .. })
        ));
        assert!(matches!(
            rx_b.recv().await,
            Some(ServerEvent::OnlineUsers { .. })
        ));

        let cursor = Cursor {
            x: 10.0,
            y: 20.0,
            scene_id: None,
        };
        assert!(room.update_cursor(&"alice".to_string(), cursor.clone()).await);
        room.broadcast(ServerEvent::UserCursorMove {
            user_id: "alice".into(),
            cursor,
        });

        match rx_b.recv().await {
            Some(ServerEvent::UserCursorMove { user_id, cursor }) => {
                assert_eq!(user_id, "alice");
                assert_eq!(cursor.x, 10.0);
            }
            other => panic!("expected cursor move, got {other:?}"),
        }

        // Alice must not see her own event echoed back: the next thing her
        // forwarder delivers after skipping it is bob's event.
        room.broadcast(ServerEvent::UserCursorMove {
            user_id: "bob".into(),
            cursor: Cursor {
                x: 1.0,
                y: 2.0,
                scene_id: None,
            },
        });
        match rx_a.recv().await {
            Some(ServerEvent::UserCursorMove { user_id, .. }) => assert_eq!(user_id, "bob"),
            other => panic!("expected bob's cursor move, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mutations_after_removal_are_no_ops() {
        let room = Room::new(DEFAULT_CHANNEL_CAPACITY);
        let (tx, _rx) = sink();
        let conn = Uuid::new_v4();
        room.add_participant(identity("alice", "Alice"), Role::Owner, conn, tx)
            .await;
        assert!(room.remove_participant(&"alice".to_string(), conn).await.is_some());

        let cursor = Cursor {
            x: 1.0,
            y: 1.0,
            scene_id: None,
        };
        assert!(!room.update_cursor(&"alice".to_string(), cursor).await);
        assert!(room.touch(&"alice".to_string()).await.is_none());
        assert!(room.record_activity(&"alice".to_string(), "typing").await.is_none());
    }

    #[tokio::test]
    async fn stale_connection_cannot_remove_a_superseding_one() {
        let room = Room::new(DEFAULT_CHANNEL_CAPACITY);
        let (tx_old, _rx_old) = sink();
        let (tx_new, _rx_new) = sink();
        let old_conn = Uuid::new_v4();
        let new_conn = Uuid::new_v4();

        room.add_participant(identity("alice", "Alice"), Role::Owner, old_conn, tx_old)
            .await;
        room.add_participant(identity("alice", "Alice"), Role::Owner, new_conn, tx_new)
            .await;
        assert_eq!(room.participant_count().await, 1);

        // The first connection's close arrives late; the fresh entry stays.
        assert!(room.remove_participant(&"alice".to_string(), old_conn).await.is_none());
        assert_eq!(room.participant_count().await, 1);

        assert!(room.remove_participant(&"alice".to_string(), new_conn).await.is_some());
        assert!(room.is_empty().await);
    }

    #[tokio::test]
    async fn idle_activity_clears_the_active_flag() {
        let room = Room::new(DEFAULT_CHANNEL_CAPACITY);
        let (tx, _rx) = sink();
        room.add_participant(identity("alice", "Alice"), Role::Owner, Uuid::new_v4(), tx)
            .await;
        room.record_activity(&"alice".to_string(), "idle").await;
        let snapshot = room.snapshot().await;
        assert!(!snapshot[0].is_active);

        room.record_activity(&"alice".to_string(), "editing scene-1").await;
        let snapshot = room.snapshot().await;
        assert!(snapshot[0].is_active);
    }
}
