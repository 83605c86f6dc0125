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
use crate::server::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub participant_count: usize,
}

/// GET /api/rooms
/// Ids and participant counts of all live rooms.
pub async fn list_rooms<A: AccessControl>(
    State(state): State<AppState<A>>,
) -> impl IntoResponse {
    let summaries: Vec<RoomSummary> = state
        .registry
        .list_rooms()
        .await
        .into_iter()
        .map(|details| RoomSummary {
            room_id: details.room_id,
            participant_count: details.participant_count,
        })
        .collect();
    Json(summaries)
}

/// GET /api/rooms/{room_id}
/// Full detail for one live room; 404 once the room has been reclaimed.
pub async fn get_room<A: AccessControl>(
    State(state): State<AppState<A>>,
    Path(room_id): Path<RoomId>,
) -> impl IntoResponse {
    match state.registry.room_details(&room_id).await {
        Some(details) => Json(details).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("RoomNotFound", "Room not found")),
        )
            .into_response(),
    }
}
