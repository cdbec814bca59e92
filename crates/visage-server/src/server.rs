use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use visage_core::events::TaskEvent;
use visage_engine::orchestrator::GenerationOrchestrator;
use visage_telemetry::MetricsRecorder;

use crate::client::{self, ClientId, ClientRegistry};
use crate::event_bridge;
use crate::handlers::{self, HandlerState};
use crate::rpc::{RpcRequest, RpcResponse};

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
    /// Upper bound for one multipart submission.
    pub max_upload_bytes: usize,
    /// Per-request upload directories are created under here.
    pub uploads_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            max_send_queue: 256,
            max_upload_bytes: 100 * 1024 * 1024,
            uploads_dir: PathBuf::from("uploads"),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler_state: Arc<HandlerState>,
    pub client_registry: Arc<ClientRegistry>,
    pub message_tx: mpsc::Sender<(ClientId, String)>,
}

/// Build the Axum router with all routes.
///
/// The `/output` file service answers whole-file GET, zero-byte HEAD with
/// an advertised byte length, and range requests — playback clients probe
/// before streaming.
pub fn build_router(state: AppState, output_dir: PathBuf, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/upload", post(upload_handler))
        .nest_service("/output", ServeDir::new(output_dir))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Create and start the server. Returns a handle that keeps its
/// background tasks alive.
pub async fn start(
    config: ServerConfig,
    orchestrator: Arc<GenerationOrchestrator>,
    metrics: Arc<MetricsRecorder>,
    event_tx: broadcast::Sender<TaskEvent>,
) -> Result<ServerHandle, std::io::Error> {
    let client_registry = Arc::new(ClientRegistry::new(config.max_send_queue));

    // Start event bridge
    let bridge_rx = event_tx.subscribe();
    let bridge_handle = event_bridge::create_bridge(Arc::clone(&client_registry), bridge_rx);

    // Start dead-client cleanup task (every 60s)
    let cleanup_handle = client::start_cleanup_task(
        Arc::clone(&client_registry),
        std::time::Duration::from_secs(60),
    );

    // Message processing channel
    let (msg_tx, msg_rx) = mpsc::channel::<(ClientId, String)>(1024);

    let output_dir = orchestrator.config().output_dir.clone();
    let handler_state = Arc::new(HandlerState::new(orchestrator, metrics, config.uploads_dir));

    let app_state = AppState {
        handler_state: Arc::clone(&handler_state),
        client_registry: Arc::clone(&client_registry),
        message_tx: msg_tx,
    };

    // Start RPC message processor
    let rpc_state = Arc::clone(&handler_state);
    let rpc_registry = Arc::clone(&client_registry);
    let rpc_handle = tokio::spawn(process_rpc_messages(msg_rx, rpc_state, rpc_registry));

    let router = build_router(app_state, output_dir, config.max_upload_bytes);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "generation server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
        _bridge: bridge_handle,
        _rpc: rpc_handle,
        _cleanup: cleanup_handle,
    })
}

/// Handle returned by `start()` — keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _bridge: tokio::task::JoinHandle<()>,
    _rpc: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a new WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, rx) = state.client_registry.register();
    tracing::info!(client_id = %client_id, "WebSocket client connected");

    let greeting = serde_json::json!({
        "type": "connected",
        "message": "Connected to generation server",
    });
    if let Ok(json) = serde_json::to_string(&greeting) {
        state.client_registry.send_to(&client_id, json).await;
    }

    client::handle_ws_connection(
        socket,
        client_id,
        rx,
        state.client_registry,
        state.message_tx,
    )
    .await;
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let resp = handlers::dispatch(
        &state.handler_state,
        &state.client_registry,
        None,
        "health",
        &serde_json::json!({}),
        None,
    )
    .await;

    let status = resp
        .result
        .as_ref()
        .and_then(|r| r.get("status"))
        .and_then(|s| s.as_str())
        .unwrap_or("unknown");

    let http_status = if status == "healthy" {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };

    (http_status, Json(resp.result.unwrap_or_default()))
}

/// Submission HTTP endpoint: multipart image + audio + settings fields.
async fn upload_handler(State(state): State<AppState>, multipart: Multipart) -> impl IntoResponse {
    match handlers::process_upload(&state.handler_state, multipart).await {
        Ok(body) => (axum::http::StatusCode::OK, Json(body)),
        Err(rejection) => {
            tracing::warn!(status = %rejection.status, error = %rejection.message, "upload rejected");
            (
                rejection.status,
                Json(serde_json::json!({ "error": rejection.message })),
            )
        }
    }
}

/// Process incoming RPC messages from WebSocket clients.
async fn process_rpc_messages(
    mut rx: mpsc::Receiver<(ClientId, String)>,
    state: Arc<HandlerState>,
    registry: Arc<ClientRegistry>,
) {
    while let Some((client_id, raw_message)) = rx.recv().await {
        let request: RpcRequest = match serde_json::from_str(&raw_message) {
            Ok(req) => req,
            Err(_) => {
                let resp = RpcResponse::parse_error();
                if let Ok(json) = serde_json::to_string(&resp) {
                    registry.send_to(&client_id, json).await;
                }
                continue;
            }
        };

        let params = request.params.unwrap_or(serde_json::json!({}));
        let response = handlers::dispatch(
            &state,
            &registry,
            Some(&client_id),
            &request.method,
            &params,
            request.id,
        )
        .await;

        if let Ok(json) = serde_json::to_string(&response) {
            registry.send_to(&client_id, json).await;
        }
    }
}
