use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use filebridge_manager::TransferManager;
use filebridge_registry::ClientRegistry;
use filebridge_types::{ClientView, ErrorKind, SessionState, SessionView};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state for every route handler, the same
/// `#[derive(Clone)] AppState` shape the teacher uses across its own route
/// modules.
#[derive(Clone)]
pub struct AppState {
    pub manager: TransferManager,
    pub registry: ClientRegistry,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/downloads", post(start_download).get(list_downloads))
        .route("/downloads/{request_id}", get(get_download).delete(cancel_download))
        .route("/clients", get(list_clients))
        .route("/clients/{client_id}", get(get_client))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct StartDownloadRequest {
    pub client_id: String,
    pub file_path: String,
}

#[derive(Debug, Serialize)]
pub struct StartDownloadResponse {
    pub request_id: String,
    pub status: SessionState,
}

async fn start_download(
    State(state): State<AppState>,
    Json(req): Json<StartDownloadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = state.manager.start(req.client_id, req.file_path).await?;
    Ok(Json(StartDownloadResponse {
        request_id,
        status: SessionState::Requested,
    }))
}

async fn get_download(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    state
        .manager
        .get(&request_id)
        .await
        .map(Json)
        .ok_or_else(|| {
            ApiError(filebridge_types::DomainError::new(
                ErrorKind::FileNotFound,
                format!("no such transfer {request_id}"),
            ))
        })
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<SessionState>,
}

async fn list_downloads(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<SessionView>> {
    Json(state.manager.list(query.status).await)
}

#[derive(Debug, Deserialize)]
pub struct CancelQuery {
    pub reason: Option<String>,
}

async fn cancel_download(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Query(query): Query<CancelQuery>,
) -> Result<Json<SessionView>, ApiError> {
    let reason = query.reason.unwrap_or_else(|| "cancelled by operator".to_string());
    Ok(Json(state.manager.cancel(&request_id, reason).await?))
}

async fn list_clients(State(state): State<AppState>) -> Json<Vec<ClientView>> {
    Json(state.registry.list().await)
}

async fn get_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Json<ClientView>, ApiError> {
    state.registry.lookup(&client_id).await.map(Json).ok_or_else(|| {
        ApiError(filebridge_types::DomainError::new(
            ErrorKind::ClientNotFound,
            format!("no such client {client_id}"),
        ))
    })
}

async fn health() -> &'static str {
    "ok"
}
