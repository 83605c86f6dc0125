use std::collections::HashMap;
use std::future::Future;

use crate::room::presence::Role;
use crate::room::{RoomId, UserId};

/// External authorization collaborator, consulted once per join. The rest of
/// the crate never re-checks: role is fixed for the life of the connection
/// and later privilege changes land on the user's next join.
pub trait AccessControl: Send + Sync + 'static {
    fn has_access(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> impl Future<Output = bool> + Send;

    fn resolve_role(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> impl Future<Output = Role> + Send;
}

/// Grants every join as `Owner`. For local development and demos, where the
/// real project membership service is not wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAccess;

impl AccessControl for OpenAccess {
    async fn has_access(&self, _room_id: &RoomId, _user_id: &UserId) -> bool {
        true
    }

    async fn resolve_role(&self, _room_id: &RoomId, _user_id: &UserId) -> Role {
        Role::Owner
    }
}

/// Fixed `(project, user) → role` roster. Anyone not on the roster is
/// denied; useful wherever deny behavior has to be exercised without a
/// membership database.
#[derive(Debug, Clone, Default)]
pub struct StaticAccess {
    roster: HashMap<(RoomId, UserId), Role>,
}

impl StaticAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, room_id: impl Into<RoomId>, user_id: impl Into<UserId>, role: Role) -> Self {
        self.roster.insert((room_id.into(), user_id.into()), role);
        self
    }
}

impl AccessControl for StaticAccess {
    async fn has_access(&self, room_id: &RoomId, user_id: &UserId) -> bool {
        self.roster
            .contains_key(&(room_id.clone(), user_id.clone()))
    }

    async fn resolve_role(&self, room_id: &RoomId, user_id: &UserId) -> Role {
        self.roster
            .get(&(room_id.clone(), user_id.clone()))
            .copied()
            .unwrap_or(Role::Viewer)
    }
}
