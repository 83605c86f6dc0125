use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use ts_rs::TS;

use super::error::CollabError;
use super::event::{ClientEvent, ServerEvent};
use super::presence::{Identity, Participant, Role};
use super::{ConnId, DEFAULT_CHANNEL_CAPACITY, EventSink, Room, RoomId, UserId};

/// Detailed information about a live room, for the inspection API.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct RoomDetails {
    pub room_id: RoomId,
    pub participant_count: usize,
    pub participants: Vec<Participant>,
    pub last_activity: DateTime<Utc>,
}

/// Process-wide map from project id to its live [`Room`].
///
/// Constructed once at startup and injected (`Arc<RoomRegistry>`) into the
/// gateway, the REST handlers, and tests; never reached through ambient
/// global state. Join and removal are serialized on the registry lock so the
/// "room exists ⇔ has ≥1 participant" invariant holds at every step.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomId, Arc<Room>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent get-or-create: returns the existing room or a fresh empty
    /// one.
    pub async fn ensure_room(&self, room_id: &RoomId) -> Arc<Room> {
        let mut rooms = self.rooms.write().await;
        Self::ensure_entry(&mut rooms, room_id)
    }

    fn ensure_entry(rooms: &mut HashMap<RoomId, Arc<Room>>, room_id: &RoomId) -> Arc<Room> {
        rooms
            .entry(room_id.clone())
            .or_insert_with(|| {
                tracing::info!(%room_id, "creating room");
                Arc::new(Room::new(DEFAULT_CHANNEL_CAPACITY))
            })
            .clone()
    }

    /// Registers a participant in `room_id`, creating the room on first
    /// join. Returns the join-ordered snapshot that was also delivered to
    /// the joiner's sink. The registry lock is held across the registration
    /// so a concurrent removal can never reclaim the room mid-join.
    pub async fn join(
        &self,
        room_id: &RoomId,
        identity: Identity,
        role: Role,
        conn_id: ConnId,
        sink: EventSink,
    ) -> Vec<Participant> {
        let mut rooms = self.rooms.write().await;
        let room = Self::ensure_entry(&mut rooms, room_id);
        let snapshot = room.add_participant(identity, role, conn_id, sink).await;
        tracing::info!(%room_id, online = snapshot.len(), "participant joined");
        snapshot
    }

    /// Removes `user_id` from `room_id` if `conn_id` still owns the entry,
    /// broadcasting the leave to the remainder. Deletes the room when its
    /// participant map empties. A remove on a room or participant that is
    /// already gone is a silent no-op, since disconnect races are expected.
    pub async fn remove_participant(&self, room_id: &RoomId, user_id: &UserId, conn_id: ConnId) {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(room_id).cloned() else {
            tracing::debug!(%room_id, %user_id, "remove for unknown room ignored");
            return;
        };
        let Some(snapshot) = room.remove_participant(user_id, conn_id).await else {
            tracing::debug!(%room_id, %user_id, "remove for unknown participant ignored");
            return;
        };
        tracing::info!(%room_id, %user_id, online = snapshot.len(), "participant left");
        if room.is_empty().await {
            room.clear().await;
            rooms.remove(room_id);
            tracing::info!(%room_id, "room reclaimed");
        }
    }

    /// The event broadcaster: classifies an inbound event, applies the
    /// matching presence mutation, and relays it to every other participant
    /// of the room with the sender's attribution attached.
    pub async fn handle_event(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        event: ClientEvent,
    ) -> Result<(), CollabError> {
        let room = self
            .rooms
            .read()
            .await
            .get(room_id)
            .cloned()
            .ok_or_else(|| CollabError::UnknownRoom(room_id.clone()))?;

        match event {
            ClientEvent::Join { .. } => {
                // Joins are a gateway concern; one arriving mid-session is a
                // client bug and carries nothing worth relaying.
                tracing::warn!(%room_id, %user_id, "join event on an active connection dropped");
                Ok(())
            }
            ClientEvent::CursorMove { cursor } => {
                if !room.update_cursor(user_id, cursor.clone()).await {
                    return Err(CollabError::UnknownParticipant(user_id.clone()));
                }
                room.broadcast(ServerEvent::UserCursorMove {
                    user_id: user_id.clone(),
                    cursor,
                });
                Ok(())
            }
            ClientEvent::SceneUpdate { scene_id, updates } => {
                let updated_by = room
                    .touch(user_id)
                    .await
                    .ok_or_else(|| CollabError::UnknownParticipant(user_id.clone()))?;
                tracing::debug!(%room_id, %user_id, %scene_id, "relaying scene update");
                room.broadcast(ServerEvent::SceneUpdated {
                    scene_id,
                    updates,
                    updated_by,
                });
                Ok(())
            }
            ClientEvent::NodeMove { node_id, position } => {
                let moved_by = room
                    .touch(user_id)
                    .await
                    .ok_or_else(|| CollabError::UnknownParticipant(user_id.clone()))?;
                room.broadcast(ServerEvent::NodeMoved {
                    node_id,
                    position,
                    moved_by,
                });
                Ok(())
            }
            ClientEvent::NodeResize {
                node_id,
                dimensions,
            } => {
                let resized_by = room
                    .touch(user_id)
                    .await
                    .ok_or_else(|| CollabError::UnknownParticipant(user_id.clone()))?;
                room.broadcast(ServerEvent::NodeResized {
                    node_id,
                    dimensions,
                    resized_by,
                });
                Ok(())
            }
            ClientEvent::ConnectionUpdate { connection } => {
                let updated_by = room
                    .touch(user_id)
                    .await
                    .ok_or_else(|| CollabError::UnknownParticipant(user_id.clone()))?;
                room.broadcast(ServerEvent::ConnectionUpdated {
                    connection,
                    updated_by,
                });
                Ok(())
            }
            ClientEvent::UserActivity { activity } => {
                let user = room
                    .record_activity(user_id, &activity)
                    .await
                    .ok_or_else(|| CollabError::UnknownParticipant(user_id.clone()))?;
                room.broadcast(ServerEvent::UserActivityUpdate {
                    user_id: user_id.clone(),
                    activity,
                    user,
                });
                Ok(())
            }
        }
    }

    pub async fn room_exists(&self, room_id: &RoomId) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Join-ordered participant snapshot, or `None` for an untracked room.
    pub async fn snapshot(&self, room_id: &RoomId) -> Option<Vec<Participant>> {
        let room = self.rooms.read().await.get(room_id).cloned()?;
        Some(room.snapshot().await)
    }

    pub async fn room_details(&self, room_id: &RoomId) -> Option<RoomDetails> {
        let room = self.rooms.read().await.get(room_id).cloned()?;
        let participants = room.snapshot().await;
        Some(RoomDetails {
            room_id: room_id.clone(),
            participant_count: participants.len(),
            participants,
            last_activity: room.last_activity().await,
        })
    }

    pub async fn list_rooms(&self) -> Vec<RoomDetails> {
        let rooms: Vec<_> = self
            .rooms
            .read()
            .await
            .iter()
            .map(|(id, room)| (id.clone(), room.clone()))
            .collect();
        let mut details = Vec::with_capacity(rooms.len());
        for (room_id, room) in rooms {
            let participants = room.snapshot().await;
            details.push(RoomDetails {
                room_id,
                participant_count: participants.len(),
                participants,
                last_activity: room.last_activity().await,
            });
        }
        details
    }
}
