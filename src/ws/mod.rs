pub mod fsm;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        State,
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
    time::Instant,
};
use uuid::Uuid;

use crate::auth::AccessControl;
use crate::room::error::CollabError;
use crate::room::event::{ClientEnvelope, ClientEvent, ServerEvent};
use crate::room::presence::Identity;
use crate::room::{ConnId, RoomId, UserId};
use crate::server::AppState;
use fsm::{ConnectionPhase, PhaseEvent};

// How often the server pings, and how long it waits for a pong before
// declaring the connection dead.
const SERVER_HEARTBEAT_INTERVAL_SECONDS: u64 = 30;
const SERVER_HEARTBEAT_TIMEOUT_SECONDS: u64 = 60;

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;
type WsReceiver = SplitStream<WebSocket>;

/// Axum handler for the collaboration endpoint. The join request and access
/// check happen on the upgraded socket, not here.
pub async fn ws_handler<A: AccessControl>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<A>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drives one connection through its lifecycle: await the join request,
/// authorize it, register the participant, then pump events both ways until
/// the transport closes.
async fn handle_socket<A: AccessControl>(socket: WebSocket, state: AppState<A>) {
    let mut phase = ConnectionPhase::Connecting.on_event(PhaseEvent::Opened);

    let (ws_sender, mut ws_receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(ws_sender));

    // --- Joining ---
    let Some(text) = await_join_frame(&mut ws_receiver).await else {
        tracing::debug!("connection closed before a join request arrived");
        return;
    };

    let (room_id, identity) = match parse_join(&text) {
        Ok(join) => join,
        Err(err) => {
            tracing::warn!(error = %err, "rejecting connection with malformed join request");
            send_event(
                &ws_sender,
                ServerEvent::Error {
                    message: "malformed join request".into(),
                },
            )
            .await;
            close_sender(&ws_sender).await;
            return;
        }
    };

    // The access check is awaited before any registry mutation.
    if !state.access.has_access(&room_id, &identity.id).await {
        phase = phase.on_event(PhaseEvent::JoinDenied);
        let err = CollabError::AccessDenied(room_id.clone());
        tracing::info!(%room_id, user_id = %identity.id, "join denied");
        send_event(
            &ws_sender,
            ServerEvent::Error {
                message: err.to_string(),
            },
        )
        .await;
        close_sender(&ws_sender).await;
        debug_assert!(phase.is_closed());
        return;
    }
    let role = state.access.resolve_role(&room_id, &identity.id).await;

    // --- Active ---
    let conn_id: ConnId = Uuid::new_v4();
    let user_id = identity.id.clone();
    let (sink, events) = mpsc::unbounded_channel();
    state
        .registry
        .join(&room_id, identity, role, conn_id, sink)
        .await;
    phase = phase.on_event(PhaseEvent::JoinGranted);
    tracing::info!(%room_id, %user_id, ?role, "websocket connection active");

    let last_pong = Arc::new(Mutex::new(Instant::now()));

    let mut writer_task = spawn_writer(ws_sender.clone(), events, user_id.clone());
    let mut reader_task = spawn_reader(
        ws_receiver,
        state.clone(),
        room_id.clone(),
        user_id.clone(),
        last_pong.clone(),
    );
    let mut heartbeat_task = spawn_heartbeat(ws_sender.clone(), last_pong, user_id.clone());

    // Whichever task finishes first (client close, dead sink, heartbeat
    // timeout) tears down the rest.
    tokio::select! {
        _ = &mut writer_task => {
            reader_task.abort();
            heartbeat_task.abort();
        }
        _ = &mut reader_task => {
            writer_task.abort();
            heartbeat_task.abort();
        }
        res = &mut heartbeat_task => {
            if let Ok(Err(reason)) = res {
                tracing::info!(%room_id, %user_id, reason, "heartbeat ended the connection");
            }
            writer_task.abort();
            reader_task.abort();
        }
    }

    // --- Closed ---
    phase = phase.on_event(PhaseEvent::TransportClosed);
    debug_assert!(phase.is_closed());
    close_sender(&ws_sender).await;
    state
        .registry
        .remove_participant(&room_id, &user_id, conn_id)
        .await;
    tracing::info!(%room_id, %user_id, "websocket connection closed");
}

/// Waits for the first text frame; control frames in between are fine.
/// `None` means the transport went away first.
async fn await_join_frame(receiver: &mut WsReceiver) -> Option<Utf8Bytes> {
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => return Some(text),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Binary(_)) => {
                tracing::warn!("ignoring binary frame while awaiting join");
                continue;
            }
            Ok(Message::Close(_)) | Err(_) => return None,
        }
    }
    None
}

fn parse_join(text: &str) -> Result<(RoomId, Identity), CollabError> {
    let envelope = ClientEnvelope::parse(text)?;
    match envelope.event {
        ClientEvent::Join { user } if user.id == envelope.user_id => {
            Ok((envelope.room_id, user))
        }
        ClientEvent::Join { user } => {
            tracing::warn!(
                envelope_user = %envelope.user_id,
                identity_user = %user.id,
                "join envelope and identity disagree"
            );
            Err(CollabError::UnknownParticipant(envelope.user_id))
        }
        _ => Err(CollabError::MalformedEvent(serde::de::Error::custom(
            "expected a join event as the first frame",
        ))),
    }
}

/// Drains the participant's event sink into the websocket.
fn spawn_writer(
    sender: WsSender,
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
    user_id: UserId,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match Utf8Bytes::try_from(event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(%user_id, error = %e, "failed to serialize server event");
                    continue;
                }
            };
            let mut guard = sender.lock().await;
            if guard.send(Message::Text(text)).await.is_err() {
                tracing::debug!(%user_id, "client unreachable, writer stopping");
                break;
            }
        }
    })
}

/// Routes inbound frames to the event broadcaster. Malformed frames and
/// disconnect races are dropped without touching the connection.
fn spawn_reader<A: AccessControl>(
    mut receiver: WsReceiver,
    state: AppState<A>,
    room_id: RoomId,
    user_id: UserId,
    last_pong: Arc<Mutex<Instant>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    let envelope = match ClientEnvelope::parse(text.as_str()) {
                        Ok(envelope) => envelope,
                        Err(err) => {
                            tracing::warn!(%room_id, %user_id, error = %err, "dropping event");
                            continue;
                        }
                    };
                    if envelope.room_id != room_id || envelope.user_id != user_id {
                        tracing::warn!(
                            %room_id, %user_id,
                            claimed_room = %envelope.room_id,
                            claimed_user = %envelope.user_id,
                            "dropping event whose envelope does not match the connection"
                        );
                        continue;
                    }
                    if let Err(err) = state
                        .registry
                        .handle_event(&room_id, &user_id, envelope.event)
                        .await
                    {
                        if err.is_silent() {
                            tracing::debug!(%room_id, %user_id, error = %err, "event dropped");
                        } else {
                            tracing::warn!(%room_id, %user_id, error = %err, "event dropped");
                        }
                    }
                }
                Ok(Message::Pong(_)) => {
                    *last_pong.lock().await = Instant::now();
                }
                Ok(Message::Ping(_)) => {
                    // Axum replies to pings on its own.
                }
                Ok(Message::Binary(payload)) => {
                    tracing::warn!(%room_id, %user_id, bytes = payload.len(), "unexpected binary frame");
                }
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::debug!(%room_id, %user_id, error = %e, "websocket receive error");
                    break;
                }
            }
        }
    })
}

/// Pings on an interval and fails the connection when pongs stop coming.
fn spawn_heartbeat(
    sender: WsSender,
    last_pong: Arc<Mutex<Instant>>,
    user_id: UserId,
) -> JoinHandle<Result<(), &'static str>> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(SERVER_HEARTBEAT_INTERVAL_SECONDS));
        let timeout = Duration::from_secs(SERVER_HEARTBEAT_TIMEOUT_SECONDS);
        loop {
            interval.tick().await;

            if last_pong.lock().await.elapsed() > timeout {
                tracing::warn!(%user_id, "no pong within timeout, disconnecting");
                return Err("heartbeat timeout");
            }

            let mut guard = sender.lock().await;
            if guard.send(Message::Ping(Vec::new().into())).await.is_err() {
                return Err("ping failed");
            }
        }
    })
}

async fn send_event(sender: &WsSender, event: ServerEvent) {
    let text = match Utf8Bytes::try_from(event) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize server event");
            return;
        }
    };
    let mut guard = sender.lock().await;
    if let Err(e) = guard.send(Message::Text(text)).await {
        tracing::debug!(error = %e, "failed to deliver event before close");
    }
}

async fn close_sender(sender: &WsSender) {
    let mut guard = sender.lock().await;
    if let Err(e) = guard.close().await {
        tracing::debug!(error = %e, "error closing websocket sender");
    }
}
