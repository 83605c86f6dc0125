use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::UserId;

/// Who a joining user claims to be, as supplied by the identity collaborator.
/// The collaboration layer treats every field as opaque.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Identity {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

/// Project-level role, resolved once at join time and fixed for the life of
/// the connection. Privilege changes land on the user's next join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Editor,
    Viewer,
}

/// A live cursor on the shared canvas, optionally pinned to a scene card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub x: f64,
    pub y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_id: Option<String>,
}

/// One online user within a room, as mirrored to every client.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
    pub is_active: bool,
    pub last_seen: DateTime<Utc>,
}

impl Participant {
    /// Fresh presence record for a joining user: active, no cursor yet.
    pub fn new(identity: Identity, role: Role) -> Self {
        Self {
            id: identity.id,
            name: identity.name,
            email: identity.email,
            role,
            cursor: None,
            is_active: true,
            last_seen: Utc::now(),
        }
    }

    pub fn attribution(&self) -> Attribution {
        Attribution {
            id: self.id.clone(),
            name: self.name.clone(),
            role: self.role,
        }
    }
}

/// Sender identity attached to every relayed document event so recipients
/// can render attribution ("moved by Jane, editor").
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Attribution {
    pub id: UserId,
    pub name: String,
    pub role: Role,
}

/// Activity strings the client reports through `user-activity`. Anything the
/// server does not recognize still relays verbatim; only "idle" clears the
/// active flag.
pub const IDLE_ACTIVITY: &str = "idle";

pub fn is_active_activity(activity: &str) -> bool {
    activity != IDLE_ACTIVITY
}
