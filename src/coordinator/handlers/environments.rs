//! Environment-management handlers: create/stop/start/delete a
//! preparation container, commit it to a new artifact, list artifacts.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::super::errors::{CoordinatorError, CoordinatorResult};
use super::super::AppState;

#[derive(Debug, Deserialize)]
pub struct CreatePreparationRequest {
    pub base_image: Option<String>,
}

pub async fn create_preparation(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<CreatePreparationRequest>,
) -> CoordinatorResult<StatusCode> {
    let base_image = request.base_image.unwrap_or_else(|| state.default_base_image.clone());
    state
        .preparation
        .create(&name, &base_image)
        .await
        .map_err(|e| CoordinatorError::Internal(e.to_string()))?;
    Ok(StatusCode::CREATED)
}

pub async fn stop_preparation(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> CoordinatorResult<StatusCode> {
    state
        .preparation
        .stop(&name)
        .await
        .map_err(|e| CoordinatorError::Internal(e.to_string()))?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn start_preparation(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> CoordinatorResult<StatusCode> {
    state
        .preparation
        .start(&name)
        .await
        .map_err(|e| CoordinatorError::Internal(e.to_string()))?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn delete_preparation(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> CoordinatorResult<StatusCode> {
    state
        .preparation
        .delete(&name)
        .await
        .map_err(|e| CoordinatorError::Internal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct ArtifactView {
    pub name: String,
    pub unix_seconds: u64,
}

pub async fn commit_preparation(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> CoordinatorResult<Json<ArtifactView>> {
    let now = Utc::now().timestamp() as u64;
    let artifact = state
        .preparation
        .commit(&name, now)
        .await
        .map_err(|e| CoordinatorError::Internal(e.to_string()))?;
    Ok(Json(ArtifactView {
        name: artifact.name,
        unix_seconds: artifact.unix_seconds,
    }))
}

pub async fn list_artifacts(State(state): State<AppState>) -> CoordinatorResult<Json<Vec<ArtifactView>>> {
    let artifacts = state
        .preparation
        .list_artifacts()
        .map_err(|e| CoordinatorError::Internal(e.to_string()))?;
    Ok(Json(
        artifacts
            .into_iter()
            .map(|a| ArtifactView {
                name: a.name,
                unix_seconds: a.unix_seconds,
            })
            .collect(),
    ))
}
