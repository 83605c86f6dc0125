//! Real-time collaboration layer for a multi-user storyboard editor.
//!
//! The server side keeps an in-memory registry of project rooms, tracks
//! each participant's ephemeral presence (cursor, activity, last-seen), and
//! fans every inbound event out to the rest of the room: best-effort,
//! at-most-once, FIFO per sender. The client side maintains one websocket
//! per editor tab and mirrors the authoritative online-user list for the
//! rendering layer. Nothing here persists: a room exists exactly as long as
//! someone is connected to it.

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod room;
pub mod server;
pub mod ws;

pub use auth::{AccessControl, OpenAccess, StaticAccess};
pub use client::{ClientError, CollabSession};
pub use config::Config;
pub use room::error::CollabError;
pub use room::event::{ClientEnvelope, ClientEvent, Dimensions, Position, ServerEvent};
pub use room::presence::{Attribution, Cursor, Identity, Participant, Role};
pub use room::registry::{RoomDetails, RoomRegistry};
pub use room::{ConnId, RoomId, UserId};
pub use server::App;
