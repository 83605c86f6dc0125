use axum::extract::ws::Utf8Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use super::error::CollabError;
use super::presence::{Attribution, Cursor, Identity, Participant};
use super::{RoomId, UserId};

/// A node position on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A node's rendered size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Dimensions {
    pub width: f64,
    pub height: f64,
}

/// Everything a client can send, tagged the way the editor frontend tags its
/// socket events. `updates` and `connection` are owned by the document store
/// and relay as opaque blobs.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ClientEvent {
    Join {
        user: Identity,
    },
    CursorMove {
        cursor: Cursor,
    },
    SceneUpdate {
        scene_id: String,
        updates: Value,
    },
    NodeMove {
        node_id: String,
        position: Position,
    },
    NodeResize {
        node_id: String,
        dimensions: Dimensions,
    },
    ConnectionUpdate {
        connection: Value,
    },
    UserActivity {
        activity: String,
    },
}

/// Client frame envelope: `{projectId, userId, type, data}`. The gateway
/// checks the ids against the connection's binding before routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEnvelope {
    #[serde(rename = "projectId")]
    pub room_id: RoomId,
    #[serde(rename = "userId")]
    pub user_id: UserId,
    #[serde(flatten)]
    pub event: ClientEvent,
}

impl ClientEnvelope {
    pub fn parse(text: &str) -> Result<Self, CollabError> {
        serde_json::from_str(text).map_err(CollabError::MalformedEvent)
    }
}

/// Everything the server emits, tagged to match what the editor frontend
/// listens for.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Join-ordered snapshot, sent to a joining client only.
    OnlineUsers {
        users: Vec<Participant>,
    },
    UserJoined {
        user: Participant,
        online_users: Vec<Participant>,
    },
    UserLeft {
        user_id: UserId,
        online_users: Vec<Participant>,
    },
    UserCursorMove {
        user_id: UserId,
        cursor: Cursor,
    },
    SceneUpdated {
        scene_id: String,
        updates: Value,
        updated_by: Attribution,
    },
    NodeMoved {
        node_id: String,
        position: Position,
        moved_by: Attribution,
    },
    NodeResized {
        node_id: String,
        dimensions: Dimensions,
        resized_by: Attribution,
    },
    ConnectionUpdated {
        connection: Value,
        updated_by: Attribution,
    },
    UserActivityUpdate {
        user_id: UserId,
        activity: String,
        user: Attribution,
    },
    /// Surfaced to the offending sender only, never broadcast.
    Error {
        message: String,
    },
}

impl ServerEvent {
    /// The participant this event originated from. Fan-out skips delivering
    /// an event back to its own origin; direct-only events have none.
    pub fn origin(&self) -> Option<&str> {
        match self {
            ServerEvent::OnlineUsers { .. } | ServerEvent::Error { .. } => None,
            ServerEvent::UserJoined { user, .. } => Some(&user.id),
            ServerEvent::UserLeft { user_id, .. } => Some(user_id),
            ServerEvent::UserCursorMove { user_id, .. } => Some(user_id),
            ServerEvent::SceneUpdated { updated_by, .. } => Some(&updated_by.id),
            ServerEvent::NodeMoved { moved_by, .. } => Some(&moved_by.id),
            ServerEvent::NodeResized { resized_by, .. } => Some(&resized_by.id),
            ServerEvent::ConnectionUpdated { updated_by, .. } => Some(&updated_by.id),
            ServerEvent::UserActivityUpdate { user_id, .. } => Some(user_id),
        }
    }
}

impl TryFrom<ServerEvent> for Utf8Bytes {
    type Error = serde_json::Error;
    fn try_from(event: ServerEvent) -> Result<Self, serde_json::Error> {
        serde_json::to_string(&event).map(Utf8Bytes::from)
    }
}
