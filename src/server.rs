use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method},
    routing::get,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::api;
use crate::auth::AccessControl;
use crate::config::Config;
use crate::room::registry::RoomRegistry;
use crate::ws::ws_handler;

/// Shared handler state: the room registry singleton plus the external
/// access-control collaborator.
#[derive(Debug)]
pub struct AppState<A: AccessControl> {
    pub registry: Arc<RoomRegistry>,
    pub access: Arc<A>,
}

impl<A: AccessControl> Clone for AppState<A> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            access: Arc::clone(&self.access),
        }
    }
}

/// The collaboration server: one websocket endpoint for the editor plus a
/// small REST surface for inspecting live rooms.
pub struct App<A: AccessControl> {
    state: AppState<A>,
    config: Config,
}

impl<A: AccessControl> App<A> {
    /// Builds the app around a fresh registry. The registry lives for the
    /// process and is reachable only through this state, never globally.
    pub fn new(config: Config, access: A) -> Self {
        Self {
            state: AppState {
                registry: Arc::new(RoomRegistry::new()),
                access: Arc::new(access),
            },
            config,
        }
    }

    pub fn registry(&self) -> Arc<RoomRegistry> {
        Arc::clone(&self.state.registry)
    }

    pub fn router(&self) -> Router {
        let cors = match &self.config.allowed_origin {
            Some(origin) => match origin.parse::<HeaderValue>() {
                Ok(value) => CorsLayer::new().allow_origin(value),
                Err(e) => {
                    error!(%origin, error = %e, "invalid CORS origin, falling back to any");
                    CorsLayer::new().allow_origin(Any)
                }
            },
            None => CorsLayer::new().allow_origin(Any),
        }
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("upgrade"),
            HeaderName::from_static("connection"),
            HeaderName::from_static("sec-websocket-key"),
            HeaderName::from_static("sec-websocket-version"),
            HeaderName::from_static("sec-websocket-extensions"),
            HeaderName::from_static("sec-websocket-protocol"),
        ]);

        Router::new()
            .route("/ws", get(ws_handler::<A>))
            .route("/api/rooms", get(api::rooms::list_rooms::<A>))
            .route("/api/rooms/{room_id}", get(api::rooms::get_room::<A>))
            .route(
                "/api/rooms/{room_id}/presence",
                get(api::presence::get_presence::<A>),
            )
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Serves on an already-bound listener. Tests bind port 0 and pass the
    /// listener in to learn the address.
    pub async fn serve(self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        let router = self.router();
        info!("collaboration server running on http://{}", listener.local_addr()?);
        match axum::serve(listener, router).await {
            Ok(()) => info!("server shut down gracefully"),
            Err(e) => error!("server error: {}", e),
        }
        Ok(())
    }

    /// Binds the configured port and serves until shutdown.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }
}
