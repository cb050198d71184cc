//! WebSocket server + REST endpoints for the dispatch system.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::{Dispatcher, NewTask};
use crate::error::{Error, StoreError};
use crate::events::DispatchEvent;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// Build the Axum router with dispatch WebSocket and REST routes.
pub fn dispatch_routes(dispatcher: Arc<Dispatcher>) -> Router {
    let state = AppState { dispatcher };

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/tasks", post(submit_task))
        .route("/api/tasks/{id}", get(task_status))
        .route("/api/workers", get(worker_statuses))
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "agent-dispatch"
    }))
}

// ── REST ────────────────────────────────────────────────────────────────

async fn submit_task(
    State(state): State<AppState>,
    Json(new_task): Json<NewTask>,
) -> impl IntoResponse {
    if new_task.details.description.trim().is_empty() || new_task.project_path.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "status": "error",
                "message": "task_type, project_path and a description are required"
            })),
        );
    }

    match state.dispatcher.submit(new_task).await {
        Ok(submission) => {
            let assigned_to = submission
                .assignment
                .assigned_to()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "DIVERSION".to_string());
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "status": "success",
                    "message": format!("Task {} submitted", submission.task_id),
                    "task_id": submission.task_id,
                    "assigned_to": assigned_to,
                    "estimated_completion": submission.assignment.estimated_completion(),
                })),
            )
        }
        Err(e) => {
            warn!(error = %e, "Task submission failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "status": "error",
                    "message": e.to_string()
                })),
            )
        }
    }
}

async fn task_status(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let Ok(task_id) = Uuid::parse_str(&id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "status": "error",
                "message": format!("invalid task id: {id}")
            })),
        );
    };

    match state.dispatcher.status_of(task_id).await {
        Ok(view) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "success",
                "data": view
            })),
        ),
        Err(Error::Store(StoreError::TaskNotFound { .. })) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "status": "error",
                "message": format!("Task {task_id} not found")
            })),
        ),
        Err(e) => {
            warn!(task_id = %task_id, error = %e, "Status lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "status": "error",
                    "message": e.to_string()
                })),
            )
        }
    }
}

async fn worker_statuses(State(state): State<AppState>) -> impl IntoResponse {
    let workers = state.dispatcher.worker_statuses().await;
    Json(serde_json::json!({
        "status": "success",
        "count": workers.len(),
        "data": workers
    }))
}

// ── WebSocket ───────────────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state.dispatcher))
}

async fn handle_socket(mut socket: WebSocket, dispatcher: Arc<Dispatcher>) {
    info!("WebSocket client connected");

    // Send the full pool snapshot on connect
    let workers = dispatcher.worker_statuses().await;
    let sync = DispatchEvent::WorkersSync { workers };
    if let Ok(json) = serde_json::to_string(&sync) {
        if socket.send(Message::Text(json.into())).await.is_err() {
            warn!("Failed to send initial sync, client disconnected");
            return;
        }
    }

    // Subscribe to broadcast channel for real-time updates
    let mut rx = dispatcher.subscribe();

    loop {
        tokio::select! {
            // Forward broadcast events to this client
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                debug!("Client disconnected during send");
                                break;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind broadcast");
                        // Re-sync with a fresh pool snapshot
                        let workers = dispatcher.worker_statuses().await;
                        let sync = DispatchEvent::WorkersSync { workers };
                        if let Ok(json) = serde_json::to_string(&sync) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }

            // The stream is one-way; drain client frames and notice closes
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket connection closed");
}
