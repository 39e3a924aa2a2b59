//! Task submission, inspection, and control handlers

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::types::{SubmitRequest, SubmitResponse};
use crate::model::{Task, TaskKind, TaskStatus};

use super::super::errors::{CoordinatorError, CoordinatorResult};
use super::super::fsm::{control_task, kill_task, ControlAction};
use super::super::AppState;

#[derive(Debug, Serialize)]
pub struct TaskView {
    pub id: String,
    pub batch_id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub assigned_node: Option<String>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub submitted_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub tunnel_port: Option<u16>,
}

impl From<Task> for TaskView {
    fn from(task: Task) -> Self {
        Self {
            id: task.id.to_string(),
            batch_id: task.batch_id.to_string(),
            kind: task.kind,
            status: task.status,
            assigned_node: task.assigned_node,
            exit_code: task.exit_code,
            error_message: task.error_message,
            submitted_at: task.submitted_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            tunnel_port: task.tunnel_port,
        }
    }
}

pub async fn submit(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> CoordinatorResult<Json<SubmitResponse>> {
    let response = state.scheduler.submit(request).await?;
    Ok(Json(response))
}

pub async fn status(
    State(state): State<AppState>,
    Path(task_id): Path<u64>,
) -> CoordinatorResult<Json<TaskView>> {
    let task = state
        .db
        .tasks()
        .await
        .get(task_id)?
        .ok_or_else(|| CoordinatorError::NotFound(format!("task {task_id}")))?;
    Ok(Json(TaskView::from(task)))
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub kind: Option<String>,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> CoordinatorResult<Json<Vec<TaskView>>> {
    let tasks = state.db.tasks().await.list_all()?;
    let filtered = tasks
        .into_iter()
        .filter(|t| match query.kind.as_deref() {
            Some("command") => t.kind == TaskKind::Command,
            Some("vps") => t.kind == TaskKind::Vps,
            _ => true,
        })
        .map(TaskView::from)
        .collect();
    Ok(Json(filtered))
}

pub async fn kill(
    State(state): State<AppState>,
    Path(task_id): Path<u64>,
) -> CoordinatorResult<Json<TaskView>> {
    let task = kill_task(&state.db, &state.dispatch, task_id).await?;
    Ok(Json(TaskView::from(task)))
}

pub async fn pause(State(state): State<AppState>, Path(task_id): Path<u64>) -> CoordinatorResult<StatusCode> {
    control_task(&state.db, &state.dispatch, task_id, ControlAction::Pause).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn resume(State(state): State<AppState>, Path(task_id): Path<u64>) -> CoordinatorResult<StatusCode> {
    control_task(&state.db, &state.dispatch, task_id, ControlAction::Resume).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub stream: LogStream,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Serve command-task logs. Absent files render as empty (spec.md §6).
pub async fn logs(
    State(state): State<AppState>,
    Path(task_id): Path<u64>,
    Query(query): Query<LogsQuery>,
) -> CoordinatorResult<String> {
    let task = state
        .db
        .tasks()
        .await
        .get(task_id)?
        .ok_or_else(|| CoordinatorError::NotFound(format!("task {task_id}")))?;

    let path = match query.stream {
        LogStream::Stdout => task.stdout_path,
        LogStream::Stderr => task.stderr_path,
    };

    match path {
        Some(path) => match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(CoordinatorError::Internal(e.to_string())),
        },
        None => Ok(String::new()),
    }
}
