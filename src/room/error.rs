use super::{RoomId, UserId};

#[derive(thiserror::Error, Debug)]
pub enum CollabError {
    #[error("access to project '{0}' denied")]
    AccessDenied(RoomId),
    #[error("project room '{0}' is not tracked")]
    UnknownRoom(RoomId),
    #[error("participant '{0}' is not tracked in this room")]
    UnknownParticipant(UserId),
    #[error("malformed event: {0}")]
    MalformedEvent(#[source] serde_json::Error),
}

impl CollabError {
    /// Disconnect races are expected; events referencing rooms or
    /// participants that are already gone are dropped without surfacing
    /// anything to the sender.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            CollabError::UnknownRoom(_) | CollabError::UnknownParticipant(_)
        )
    }
}
