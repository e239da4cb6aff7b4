use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use courier_gateway::SessionRegistry;
use courier_store::Database;

use crate::bridge;
use crate::routes;
use crate::ws::{self, SubscriberRegistry};

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            max_send_queue: 256,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub db: Database,
    pub subscribers: Arc<SubscriberRegistry>,
    pub started_at: Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions/start", post(routes::start_session))
        .route("/api/sessions/disconnect", post(routes::disconnect_session))
        .route("/api/sessions/{client_id}/status", get(routes::session_status))
        .route("/api/messages/send", post(routes::send_message))
        .route("/api/messages/{client_id}", get(routes::list_messages))
        .route("/ws", get(ws_handler))
        .route("/health", get(routes::health))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps the background
/// tasks alive.
pub async fn start(
    config: ServerConfig,
    registry: SessionRegistry,
    db: Database,
) -> Result<ServerHandle, std::io::Error> {
    let subscribers = Arc::new(SubscriberRegistry::new(config.max_send_queue));

    let bridge_handle = bridge::create_bridge(Arc::clone(&subscribers), registry.subscribe());

    let cleanup = ws::start_cleanup_task(
        Arc::clone(&subscribers),
        std::time::Duration::from_secs(60),
    );

    let app_state = AppState {
        registry,
        db,
        subscribers,
        started_at: Instant::now(),
    };

    let router = build_router(app_state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "courier server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
        _bridge: bridge_handle,
        _cleanup: cleanup,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _bridge: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (subscriber_id, rx) = state.subscribers.register();
    tracing::info!(subscriber_id = %subscriber_id, "websocket subscriber connected");

    ws::handle_ws_connection(socket, subscriber_id, rx, state.subscribers).await;
}
