//! RPC method handlers and the upload boundary.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::Multipart;
use axum::http::StatusCode;
use chrono::Utc;

use visage_core::ids::{TaskId, UploadId};
use visage_core::settings::GenerationSettings;
use visage_engine::orchestrator::GenerationOrchestrator;
use visage_telemetry::MetricsRecorder;

use crate::client::{ClientId, ClientRegistry};
use crate::rpc::{self, RpcResponse};

/// Shared state available to all RPC handlers.
pub struct HandlerState {
    pub orchestrator: Arc<GenerationOrchestrator>,
    pub metrics: Arc<MetricsRecorder>,
    /// Per-request upload directories are created under here.
    pub uploads_dir: PathBuf,
}

impl HandlerState {
    pub fn new(
        orchestrator: Arc<GenerationOrchestrator>,
        metrics: Arc<MetricsRecorder>,
        uploads_dir: PathBuf,
    ) -> Self {
        Self {
            orchestrator,
            metrics,
            uploads_dir,
        }
    }
}

/// Dispatch an RPC method to the appropriate handler.
///
/// `client` carries the originating WebSocket client when there is one;
/// HTTP callers pass `None`.
pub async fn dispatch(
    state: &Arc<HandlerState>,
    clients: &Arc<ClientRegistry>,
    client: Option<&ClientId>,
    method: &str,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    match method {
        // Status queries
        "get_task_status" | "task.status" => get_task_status(state, params, id),
        "get_generation_status" | "generation.status" => get_generation_status(state, id),

        // Per-task join signal
        "join_task_room" | "task.join" => join_task_room(clients, client, params, id).await,

        // System
        "health" | "system.ping" => health(state, id),
        "telemetry.metrics" => telemetry_metrics(state, id),

        _ => RpcResponse::method_not_found(id, method),
    }
}

// ── Status handlers ──

fn get_task_status(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let task_id = match rpc::require_str(params, "task_id") {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    match state.orchestrator.task_status(&TaskId::from_raw(task_id)) {
        Some(task) => RpcResponse::success(
            id,
            serde_json::json!({
                "task_id": task.id,
                "status": task.status.as_str(),
                "result": task.result,
                "error": task.error,
            }),
        ),
        None => RpcResponse::success(
            id,
            serde_json::json!({
                "task_id": task_id,
                "status": "not_found",
            }),
        ),
    }
}

fn get_generation_status(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    let counts = state.orchestrator.generation_status();
    RpcResponse::success(
        id,
        serde_json::json!({
            "active_tasks": counts.active_tasks,
            "total_tasks": counts.total_tasks,
        }),
    )
}

async fn join_task_room(
    clients: &Arc<ClientRegistry>,
    client: Option<&ClientId>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let task_id = match rpc::require_str(params, "task_id") {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    // Recorded for introspection only; event delivery stays broadcast-to-all.
    if let Some(client_id) = client {
        clients.watch_task(client_id, TaskId::from_raw(task_id)).await;
    }

    RpcResponse::success(
        id,
        serde_json::json!({
            "task_id": task_id,
            "joined": true,
        }),
    )
}

// ── System handlers ──

fn health(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    let counts = state.orchestrator.generation_status();
    let worker = state.orchestrator.invoker().config();
    RpcResponse::success(
        id,
        serde_json::json!({
            "status": "healthy",
            "timestamp": Utc::now().to_rfc3339(),
            "worker_path": worker.install_dir.display().to_string(),
            "active_tasks": counts.active_tasks,
        }),
    )
}

fn telemetry_metrics(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    let values = state.metrics.collect();
    let metrics = serde_json::to_value(&values).unwrap_or(serde_json::Value::Null);
    RpcResponse::success(id, serde_json::json!({ "metrics": metrics }))
}

// ── Upload boundary ──

/// A submission rejected before reaching the orchestrator.
#[derive(Debug)]
pub struct UploadRejection {
    pub status: StatusCode,
    pub message: String,
}

fn reject(status: StatusCode, message: impl Into<String>) -> UploadRejection {
    UploadRejection {
        status,
        message: message.into(),
    }
}

/// Receive a multipart submission: save both blobs into a fresh upload
/// directory, coerce the settings fields once, and hand the orchestrator
/// a ready `(image_path, audio_path, settings)` tuple.
pub async fn process_upload(
    state: &Arc<HandlerState>,
    mut multipart: Multipart,
) -> Result<serde_json::Value, UploadRejection> {
    let mut image: Option<(String, Vec<u8>)> = None;
    let mut audio: Option<(String, Vec<u8>)> = None;
    let mut fields: HashMap<String, String> = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| reject(StatusCode::BAD_REQUEST, e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| reject(StatusCode::BAD_REQUEST, e.to_string()))?;
                image = Some((file_name, data.to_vec()));
            }
            "audio" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| reject(StatusCode::BAD_REQUEST, e.to_string()))?;
                audio = Some((file_name, data.to_vec()));
            }
            _ => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| reject(StatusCode::BAD_REQUEST, e.to_string()))?;
                fields.insert(name, value);
            }
        }
    }

    let Some((image_name, image_bytes)) = image else {
        return Err(reject(StatusCode::BAD_REQUEST, "Missing image or audio file"));
    };
    let Some((audio_name, audio_bytes)) = audio else {
        return Err(reject(StatusCode::BAD_REQUEST, "Missing image or audio file"));
    };

    let (settings, unknown) = GenerationSettings::from_fields(&fields);
    if !unknown.is_empty() {
        tracing::debug!(?unknown, "ignoring unrecognized settings fields");
    }

    let upload_dir = state.uploads_dir.join(UploadId::new().as_str());
    tokio::fs::create_dir_all(&upload_dir)
        .await
        .map_err(|e| reject(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let image_path = upload_dir.join(format!("source_image.{}", extension_of(&image_name, "jpg")));
    let audio_path = upload_dir.join(format!("driven_audio.{}", extension_of(&audio_name, "wav")));
    tokio::fs::write(&image_path, &image_bytes)
        .await
        .map_err(|e| reject(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    tokio::fs::write(&audio_path, &audio_bytes)
        .await
        .map_err(|e| reject(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    tracing::info!(
        image = %image_path.display(),
        image_bytes = image_bytes.len(),
        audio = %audio_path.display(),
        audio_bytes = audio_bytes.len(),
        "upload received"
    );

    match state.orchestrator.submit(image_path, audio_path, settings) {
        Ok(task_id) => Ok(serde_json::json!({
            "task_id": task_id,
            "status": "started",
            "message": "Generation started successfully",
        })),
        Err(err) => Err(reject(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())),
    }
}

fn extension_of(file_name: &str, default: &str) -> String {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| default.to_string())
}
