//! Client-side collaboration session: one websocket per editor tab,
//! mirroring the authoritative online-user list and exposing typed sends
//! for each event kind.

use std::sync::{
    Arc, RwLock,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use chrono::Utc;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde_json::Value;
use tokio::{
    net::TcpStream,
    sync::{Mutex, mpsc, watch},
    time::Instant,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};
use url::Url;

use crate::room::event::{ClientEnvelope, ClientEvent, Dimensions, Position, ServerEvent};
use crate::room::presence::{Cursor, Identity, Participant, is_active_activity};
use crate::room::{RoomId, UserId};

type WsWriter = Arc<Mutex<SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>>>;
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

// Slightly tighter than the server's timeout so a dead server is noticed
// before it would have dropped us anyway.
const HEARTBEAT_INTERVAL_SECONDS: u64 = 30;
const HEARTBEAT_TIMEOUT_SECONDS: u64 = 60;

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("join rejected: {0}")]
    JoinRejected(String),
    #[error("connection closed before the join completed")]
    ClosedDuringJoin,
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A live collaboration session for one project.
///
/// Dropping the session abandons the connection; call [`close`] for a
/// graceful goodbye. Send operations become silent no-ops once the
/// connection is lost; callers are not expected to buffer or retry.
///
/// [`close`]: CollabSession::close
#[derive(Debug)]
pub struct CollabSession {
    room_id: RoomId,
    user_id: UserId,
    writer: WsWriter,
    connected: Arc<AtomicBool>,
    online_users: Arc<RwLock<Vec<Participant>>>,
    events: Option<mpsc::UnboundedReceiver<ServerEvent>>,
    shutdown_tx: watch::Sender<bool>,
}

impl CollabSession {
    /// Connects to the collaboration server and joins `room_id` as
    /// `identity`. Resolves once the server has confirmed the join with the
    /// room snapshot, or fails with [`ClientError::JoinRejected`] when the
    /// access check turns us away.
    pub async fn connect(
        server: &str,
        room_id: impl Into<RoomId>,
        identity: Identity,
    ) -> Result<Self, ClientError> {
        let room_id: RoomId = room_id.into();
        let mut url = Url::parse(server)?;
        url.set_path("/ws");

        let user_id = identity.id.clone();
        tracing::info!(%room_id, %user_id, "connecting to {url}");
        let (ws_stream, _response) = connect_async(url.as_str()).await?;
        let (write, read) = ws_stream.split();
        let writer: WsWriter = Arc::new(Mutex::new(write));

        // Join request is the first frame on the wire.
        let join = ClientEnvelope {
            room_id: room_id.clone(),
            user_id: user_id.clone(),
            event: ClientEvent::Join { user: identity },
        };
        {
            let mut guard = writer.lock().await;
            guard
                .send(Message::Text(serde_json::to_string(&join)?.into()))
                .await?;
        }

        let (reader, snapshot) = await_snapshot(read).await?;
        tracing::info!(%room_id, %user_id, online = snapshot.len(), "joined");

        let connected = Arc::new(AtomicBool::new(true));
        let online_users = Arc::new(RwLock::new(snapshot));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let last_pong = Arc::new(Mutex::new(Instant::now()));

        tokio::spawn(receiver_task(
            reader,
            online_users.clone(),
            events_tx,
            connected.clone(),
            last_pong.clone(),
            shutdown_rx.clone(),
            shutdown_tx.clone(),
        ));
        tokio::spawn(heartbeat_task(
            writer.clone(),
            last_pong,
            connected.clone(),
            shutdown_rx,
            shutdown_tx.clone(),
        ));

        Ok(Self {
            room_id,
            user_id,
            writer,
            connected,
            online_users,
            events: Some(events_rx),
            shutdown_tx,
        })
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The latest authoritative view of who is online, join-ordered. The
    /// mirror is updated synchronously by the receive task before any event
    /// is surfaced through [`events`], so it is never behind them.
    ///
    /// [`events`]: CollabSession::events
    pub fn online_users(&self) -> Vec<Participant> {
        self.online_users
            .read()
            .map(|users| users.clone())
            .unwrap_or_default()
    }

    /// Takes the stream of document-level events (scene/node/connection
    /// updates and activity pings) for the rendering layer. Yields `None`
    /// after the first call.
    pub fn events(&mut self) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        self.events.take()
    }

    pub async fn send_cursor_move(&self, cursor: Cursor) -> Result<(), ClientError> {
        self.send(ClientEvent::CursorMove { cursor }).await
    }

    pub async fn send_scene_update(
        &self,
        scene_id: impl Into<String>,
        updates: Value,
    ) -> Result<(), ClientError> {
        self.send(ClientEvent::SceneUpdate {
            scene_id: scene_id.into(),
            updates,
        })
        .await
    }

    pub async fn send_node_move(
        &self,
        node_id: impl Into<String>,
        position: Position,
    ) -> Result<(), ClientError> {
        self.send(ClientEvent::NodeMove {
            node_id: node_id.into(),
            position,
        })
        .await
    }

    pub async fn send_node_resize(
        &self,
        node_id: impl Into<String>,
        dimensions: Dimensions,
    ) -> Result<(), ClientError> {
        self.send(ClientEvent::NodeResize {
            node_id: node_id.into(),
            dimensions,
        })
        .await
    }

    pub async fn send_connection_update(&self, connection: Value) -> Result<(), ClientError> {
        self.send(ClientEvent::ConnectionUpdate { connection }).await
    }

    pub async fn send_user_activity(&self, activity: impl Into<String>) -> Result<(), ClientError> {
        self.send(ClientEvent::UserActivity {
            activity: activity.into(),
        })
        .await
    }

    /// Gracefully closes the connection. The server notices the close and
    /// broadcasts our leave; no explicit leave message exists or is needed.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
        let mut guard = self.writer.lock().await;
        if let Err(e) = guard.close().await {
            tracing::debug!(error = %e, "error closing websocket writer");
        }
    }

    async fn send(&self, event: ClientEvent) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Ok(());
        }
        let envelope = ClientEnvelope {
            room_id: self.room_id.clone(),
            user_id: self.user_id.clone(),
            event,
        };
        let text = serde_json::to_string(&envelope)?;
        let mut guard = self.writer.lock().await;
        if let Err(e) = guard.send(Message::Text(text.into())).await {
            tracing::warn!(error = %e, "send failed, marking session disconnected");
            self.connected.store(false, Ordering::SeqCst);
            let _ = self.shutdown_tx.send(true);
        }
        Ok(())
    }
}

/// Consumes frames until the server answers the join: the room snapshot on
/// success, an error frame on denial.
async fn await_snapshot(
    mut reader: WsReader,
) -> Result<(WsReader, Vec<Participant>), ClientError> {
    while let Some(frame) = reader.next().await {
        match frame? {
            Message::Text(text) => match serde_json::from_str::<ServerEvent>(text.as_str()) {
                Ok(ServerEvent::OnlineUsers { users }) => return Ok((reader, users)),
                Ok(ServerEvent::Error { message }) => {
                    return Err(ClientError::JoinRejected(message));
                }
                Ok(other) => {
                    tracing::debug!(?other, "ignoring event before snapshot");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "unparseable frame during join");
                }
            },
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {}
            Message::Close(_) => break,
        }
    }
    Err(ClientError::ClosedDuringJoin)
}

/// Receives server events: every event updates the online-user mirror first,
/// then document-level events are surfaced to the rendering layer.
async fn receiver_task(
    mut reader: WsReader,
    online_users: Arc<RwLock<Vec<Participant>>>,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    connected: Arc<AtomicBool>,
    last_pong: Arc<Mutex<Instant>>,
    mut shutdown_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
) {
    loop {
        tokio::select! {
            frame = reader.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(text.as_str()) {
                            Ok(event) => {
                                if let Ok(mut users) = online_users.write() {
                                    apply_to_mirror(&mut users, &event);
                                }
                                if is_document_event(&event) {
                                    // A vanished rendering layer is fine;
                                    // the mirror stays live regardless.
                                    let _ = events_tx.send(event);
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "unparseable server event"),
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        *last_pong.lock().await = Instant::now();
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // tokio-tungstenite answers pings on its own.
                    }
                    Some(Ok(Message::Binary(payload))) => {
                        tracing::warn!(bytes = payload.len(), "unexpected binary frame");
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        connected.store(false, Ordering::SeqCst);
                        let _ = shutdown_tx.send(true);
                        break;
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!("session receiver exiting");
}

/// Client-side liveness: ping on an interval, give up when pongs stop.
async fn heartbeat_task(
    writer: WsWriter,
    last_pong: Arc<Mutex<Instant>>,
    connected: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECONDS));
    let timeout = Duration::from_secs(HEARTBEAT_TIMEOUT_SECONDS);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if last_pong.lock().await.elapsed() > timeout {
                    tracing::warn!("no pong from server, assuming connection lost");
                    connected.store(false, Ordering::SeqCst);
                    let _ = shutdown_tx.send(true);
                    break;
                }
                let mut guard = writer.lock().await;
                if guard.send(Message::Ping(vec![].into())).await.is_err() {
                    connected.store(false, Ordering::SeqCst);
                    let _ = shutdown_tx.send(true);
                    break;
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

fn is_document_event(event: &ServerEvent) -> bool {
    matches!(
        event,
        ServerEvent::SceneUpdated { .. }
            | ServerEvent::NodeMoved { .. }
            | ServerEvent::NodeResized { .. }
            | ServerEvent::ConnectionUpdated { .. }
            | ServerEvent::UserActivityUpdate { .. }
    )
}

/// Folds one server event into the local online-user mirror.
fn apply_to_mirror(users: &mut Vec<Participant>, event: &ServerEvent) {
    match event {
        ServerEvent::OnlineUsers { users: latest }
        | ServerEvent::UserJoined {
            online_users: latest,
            ..
        }
        | ServerEvent::UserLeft {
            online_users: latest,
            ..
        } => {
            *users = latest.clone();
        }
        ServerEvent::UserCursorMove { user_id, cursor } => {
            if let Some(user) = users.iter_mut().find(|u| &u.id == user_id) {
                user.cursor = Some(cursor.clone());
                user.last_seen = Utc::now();
            }
        }
        ServerEvent::UserActivityUpdate {
            user_id, activity, ..
        } => {
            if let Some(user) = users.iter_mut().find(|u| &u.id == user_id) {
                user.is_active = is_active_activity(activity);
                user.last_seen = Utc::now();
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::presence::Role;

    fn participant(id: &str) -> Participant {
        Participant::new(
            Identity {
                id: id.into(),
                name: id.into(),
                email: format!("{id}@example.com"),
            },
            Role::Editor,
        )
    }

    #[test]
    fn snapshot_events_replace_the_mirror() {
        let mut users = vec![participant("alice")];
        apply_to_mirror(
            &mut users,
            &ServerEvent::UserJoined {
                user: participant("bob"),
                online_users: vec![participant("alice"), participant("bob")],
            },
        );
        assert_eq!(users.len(), 2);

        apply_to_mirror(
            &mut users,
            &ServerEvent::UserLeft {
                user_id: "alice".into(),
                online_users: vec![participant("bob")],
            },
        );
        let ids: Vec<_> = users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, ["bob"]);
    }

    #[test]
    fn cursor_moves_update_only_that_user() {
        let mut users = vec![participant("alice"), participant("bob")];
        apply_to_mirror(
            &mut users,
            &ServerEvent::UserCursorMove {
                user_id: "alice".into(),
                cursor: Cursor {
                    x: 10.0,
                    y: 20.0,
                    scene_id: None,
                },
            },
        );
        let alice = users.iter().find(|u| u.id == "alice").unwrap();
        let bob = users.iter().find(|u| u.id == "bob").unwrap();
        assert_eq!(alice.cursor.as_ref().map(|c| (c.x, c.y)), Some((10.0, 20.0)));
        assert!(bob.cursor.is_none());
    }

    #[test]
    fn cursor_moves_for_unknown_users_are_ignored() {
        let mut users = vec![participant("alice")];
        apply_to_mirror(
            &mut users,
            &ServerEvent::UserCursorMove {
                user_id: "ghost".into(),
                cursor: Cursor {
                    x: 0.0,
                    y: 0.0,
                    scene_id: None,
                },
            },
        );
        assert_eq!(users.len(), 1);
        assert!(users[0].cursor.is_none());
    }

    #[test]
    fn activity_toggles_the_active_flag() {
        let mut users = vec![participant("alice")];
        apply_to_mirror(
            &mut users,
            &ServerEvent::UserActivityUpdate {
                user_id: "alice".into(),
                activity: "idle".into(),
                user: participant("alice").attribution(),
            },
        );
        assert!(!users[0].is_active);
    }

    #[test]
    fn document_events_do_not_touch_the_mirror() {
        let mut users = vec![participant("alice")];
        let before = users[0].last_seen;
        apply_to_mirror(
            &mut users,
            &ServerEvent::SceneUpdated {
                scene_id: "scene-1".into(),
                updates: serde_json::json!({}),
                updated_by: participant("bob").attribution(),
            },
        );
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].last_seen, before);
    }
}
