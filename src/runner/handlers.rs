//! HTTP handlers for the Runner's control-plane endpoints: `run`, `kill`,
//! `pause`, `resume`, plus `healthz` for local operability.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::api::types::{ControlRequest, ControlResponse, FailureEnvelope, FailureKind, RunRequest, RunResponse};
use crate::environment::{BackendError, LaunchSpec};
use crate::model::{MountSpec, ResourceRequest, Task, TaskPayload, TaskStatus};

use super::AppState;

#[derive(Debug, Error)]
pub enum RunnerHandlerError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("task not tracked: {0}")]
    NotTracked(u64),
}

impl RunnerHandlerError {
    fn kind(&self) -> FailureKind {
        match self {
            RunnerHandlerError::Backend(_) => FailureKind::Backend,
            RunnerHandlerError::NotTracked(_) => FailureKind::Validation,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            RunnerHandlerError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RunnerHandlerError::NotTracked(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for RunnerHandlerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let envelope = FailureEnvelope {
            kind: self.kind(),
            reason: self.to_string(),
        };
        (status, Json(envelope)).into_response()
    }
}

type RunnerHandlerResult<T> = Result<T, RunnerHandlerError>;

pub async fn run(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> RunnerHandlerResult<Json<RunResponse>> {
    let locker = state.task_lockers.get(&request.task_id.to_string());
    let _guard = locker.acquire().await.map_err(|e| {
        RunnerHandlerError::Backend(BackendError::Other(format!("lock acquisition failed: {e}")))
    })?;

    let payload = match request.kind {
        crate::model::TaskKind::Command => {
            TaskPayload::Command(request.command.clone().unwrap_or_default())
        }
        crate::model::TaskKind::Vps => TaskPayload::Vps(request.vps.clone().unwrap_or_default()),
    };

    let task = Task {
        id: request.task_id,
        batch_id: request.batch_id,
        kind: request.kind,
        payload,
        resources: ResourceRequest {
            cores: request.cores,
            memory_bytes: request.memory_bytes,
            gpu_ids: request.gpu_ids.clone(),
            numa_id: request.numa_id,
        },
        environment: request.environment.clone(),
        privileged: request.privileged,
        mounts: request.mounts.clone(),
        assigned_node: None,
        unit_name: Some(request.unit_name.clone()),
        stdout_path: request.stdout_path.clone(),
        stderr_path: request.stderr_path.clone(),
        exit_code: None,
        error_message: None,
        status: TaskStatus::Running,
        submitted_at: chrono::Utc::now().timestamp(),
        started_at: None,
        completed_at: None,
        tunnel_port: None,
        assignment_suspicion: 0,
    };

    let spec = LaunchSpec {
        task,
        unit_name: request.unit_name.clone(),
        stdout_path: request.stdout_path.clone(),
        stderr_path: request.stderr_path.clone(),
        shared_data_dir: state.shared_data_dir.clone(),
        local_temp_dir: state.local_temp_dir.clone(),
        extra_mounts: request
            .mounts
            .iter()
            .map(|m| MountSpec {
                host_path: m.host_path.clone(),
                container_path: m.container_path.clone(),
                read_only: m.read_only,
            })
            .collect(),
        env: Default::default(),
    };

    let tunnel_port = state.tracker.run(spec).await?;
    Ok(Json(RunResponse { tunnel_port }))
}

pub async fn kill(
    State(state): State<AppState>,
    Json(request): Json<ControlRequest>,
) -> RunnerHandlerResult<Json<ControlResponse>> {
    let locker = state.task_lockers.get(&request.task_id.to_string());
    let _guard = locker.acquire().await.map_err(|e| {
        RunnerHandlerError::Backend(BackendError::Other(format!("lock acquisition failed: {e}")))
    })?;

    let backend = state
        .tracker
        .backend_for_task(request.task_id)
        .ok_or(RunnerHandlerError::NotTracked(request.task_id))?;
    backend.kill(request.task_id).await?;
    state.tracker.forget(request.task_id);

    Ok(Json(ControlResponse {
        description: format!("killed {}", request.unit_name),
    }))
}

pub async fn pause(
    State(state): State<AppState>,
    Json(request): Json<ControlRequest>,
) -> RunnerHandlerResult<Json<ControlResponse>> {
    let backend = state
        .tracker
        .backend_for_task(request.task_id)
        .ok_or(RunnerHandlerError::NotTracked(request.task_id))?;
    backend.pause(request.task_id).await?;
    Ok(Json(ControlResponse {
        description: format!("paused {}", request.unit_name),
    }))
}

pub async fn resume(
    State(state): State<AppState>,
    Json(request): Json<ControlRequest>,
) -> RunnerHandlerResult<Json<ControlResponse>> {
    let backend = state
        .tracker
        .backend_for_task(request.task_id)
        .ok_or(RunnerHandlerError::NotTracked(request.task_id))?;
    backend.resume(request.task_id).await?;
    Ok(Json(ControlResponse {
        description: format!("resumed {}", request.unit_name),
    }))
}

pub async fn healthz() -> StatusCode {
    StatusCode::OK
}
