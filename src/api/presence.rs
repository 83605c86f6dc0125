use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;

use crate::api::ErrorResponse;
use crate::auth::AccessControl;
use crate::room::RoomId;
use crate::room::presence::Participant;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    pub users: Vec<Participant>,
}

/// GET /api/rooms/{room_id}/presence
/// Join-ordered snapshot of who is currently in the room.
pub async fn get_presence<A: AccessControl>(
    State(state): State<AppState<A>>,
    Path(room_id): Path<RoomId>,
) -> impl IntoResponse {
    match state.registry.snapshot(&room_id).await {
        Some(users) => Json(PresenceResponse { users }).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("RoomNotFound", "Room not found")),
        )
            .into_response(),
    }
}
