//! `HubServer` — the Axum HTTP + WebSocket outer surface.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::HubConfig;
use crate::health::{self, HealthResponse};
use crate::heartbeat::HeartbeatMonitor;
use crate::secret::AdminSecret;
use crate::service::HubService;
use crate::shutdown::ShutdownCoordinator;
use crate::ws;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The hub service.
    pub service: Arc<HubService>,
    /// When the server started.
    pub start_time: Instant,
}

/// The hub server: routes, background loops, graceful shutdown.
pub struct HubServer {
    config: HubConfig,
    service: Arc<HubService>,
    shutdown: Arc<ShutdownCoordinator>,
    secret: AdminSecret,
    start_time: Instant,
}

impl HubServer {
    /// Create a server (and its service) from configuration.
    pub fn new(config: HubConfig) -> Self {
        let service = HubService::new(config.clone());
        Self {
            config,
            service,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            secret: AdminSecret::generate(),
            start_time: Instant::now(),
        }
    }

    /// Build the router: health check, client WebSocket, and the
    /// secret-path admin WebSocket. CORS is open — browser admin UIs
    /// connect cross-origin.
    pub fn router(&self) -> Router {
        let state = AppState {
            service: self.service.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(client_ws_handler))
            .route(&format!("/{}/ws", self.secret.as_str()), get(admin_ws_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind, start the heartbeat and reconciliation loops, and serve until
    /// shutdown. Returns the bound address and the serve task handle.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener =
            tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let local = listener.local_addr()?;

        let monitor = HeartbeatMonitor::new(
            self.service.clone(),
            self.config.heartbeat_interval(),
            self.config.ping_timeout(),
        );
        drop(tokio::spawn(monitor.run(self.shutdown.token())));
        drop(tokio::spawn(
            self.service
                .clone()
                .run_reconciler(self.config.reconcile_interval(), self.shutdown.token()),
        ));

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });

        info!(addr = %local, "hub listening");
        info!(secret = %self.secret, "admin path secret");
        Ok((local, handle))
    }

    /// The hub service.
    pub fn service(&self) -> &Arc<HubService> {
        &self.service
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The admin path secret.
    pub fn secret(&self) -> &AdminSecret {
        &self.secret
    }

    /// The server configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }
}

/// Prefer the proxy-reported origin over the socket address.
fn remote_addr(headers: &HeaderMap, fallback: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| fallback.to_string(), ToOwned::to_owned)
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.service.peer_count(),
    ))
}

/// GET /ws — ordinary node connection.
async fn client_ws_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let remote = remote_addr(&headers, addr);
    let max_message = state.service.config().max_frame_bytes + 8;
    ws.max_message_size(max_message).on_upgrade(move |socket| async move {
        let stream = ws::byte_stream(socket, state.service.config().max_frame_bytes);
        let _ = state.service.connect_client(stream, remote);
    })
}

/// GET /{secret}/ws — privileged admin connection.
async fn admin_ws_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let remote = remote_addr(&headers, addr);
    let max_message = state.service.config().max_frame_bytes + 8;
    ws.max_message_size(max_message).on_upgrade(move |socket| async move {
        let stream = ws::byte_stream(socket, state.service.config().max_frame_bytes);
        state.service.connect_admin(stream, remote);
    })
}
