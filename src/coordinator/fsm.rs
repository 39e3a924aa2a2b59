//! Task state machine transitions driven by the Coordinator itself: kill
//! (optimistic, then confirmed), pause/resume forwarding, and absorption
//! of runner-reported updates (spec.md §3, §4.4).

use chrono::Utc;
use tracing::warn;

use crate::api::types::{ControlRequest, TaskUpdateRequest, TaskUpdateResponse};
use crate::api::types::{FailureEnvelope, FailureKind};
use crate::model::{Task, TaskStatus};
use crate::store::Database;

use super::dispatch::RunnerClientPool;
use super::errors::{CoordinatorError, CoordinatorResult};
use super::scheduler::control_request_for;

pub enum ControlAction {
    Pause,
    Resume,
}

/// `kill` writes `killed` to the store immediately so the client sees
/// progress, then relays the signal to the runner best-effort; the
/// runner's subsequent update is absorbed (terminal states don't overwrite).
pub async fn kill_task(
    db: &Database,
    dispatch: &RunnerClientPool,
    task_id: u64,
) -> CoordinatorResult<Task> {
    let mut task = db
        .tasks()
        .await
        .get(task_id)?
        .ok_or_else(|| CoordinatorError::NotFound(format!("task {task_id}")))?;

    let transitioned = !task.status.is_terminal();
    if transitioned {
        task.try_transition(TaskStatus::Killed);
        task.completed_at = Some(Utc::now().timestamp());
        db.tasks().await.update(&task)?;
    }

    if transitioned {
        if let (Some(request), Some(node)) = (
            control_request_for(&task),
            db.nodes().await.get(
                task.assigned_node
                    .as_deref()
                    .unwrap_or_default(),
            )?,
        ) {
            if let Err(e) = dispatch.kill(&node.url, &request).await {
                warn!(task_id, error = %e, "best-effort kill relay to runner failed");
            }
        }
    }

    Ok(task)
}

/// `control(pause|resume)` validates the current status permits the
/// action, forwards it to the runner, and on success transitions and
/// persists the new status itself (optimistically, like `kill`) rather
/// than waiting on a runner-pushed update.
pub async fn control_task(
    db: &Database,
    dispatch: &RunnerClientPool,
    task_id: u64,
    action: ControlAction,
) -> CoordinatorResult<()> {
    let mut task = db
        .tasks()
        .await
        .get(task_id)?
        .ok_or_else(|| CoordinatorError::NotFound(format!("task {task_id}")))?;

    let allowed = match action {
        ControlAction::Pause => task.status == TaskStatus::Running,
        ControlAction::Resume => task.status == TaskStatus::Paused,
    };
    if !allowed {
        return Err(CoordinatorError::Conflict(format!(
            "task {task_id} is not in a state that permits this action"
        )));
    }

    let request = control_request_for(&task)
        .ok_or_else(|| CoordinatorError::Internal("task has no execution unit".to_string()))?;
    let node = db
        .nodes()
        .await
        .get(task.assigned_node.as_deref().unwrap_or_default())?
        .ok_or_else(|| CoordinatorError::NotFound("owning node no longer registered".to_string()))?;

    // Open question in spec.md §9: whether resume on an offline node's task
    // should be allowed. Resolved here as rejected for both pause and
    // resume, since neither can reach a runner that isn't live.
    if node.status != crate::model::NodeStatus::Online {
        return Err(CoordinatorError::Liveness(format!(
            "owning node {} is offline",
            node.hostname
        )));
    }

    match action {
        ControlAction::Pause => dispatch.pause(&node.url, &request).await,
        ControlAction::Resume => dispatch.resume(&node.url, &request).await,
    }
    .map_err(|e| CoordinatorError::Internal(format!("runner rejected control request: {e}")))?;

    task.try_transition(match action {
        ControlAction::Pause => TaskStatus::Paused,
        ControlAction::Resume => TaskStatus::Running,
    });
    db.tasks().await.update(&task)?;

    Ok(())
}

/// Absorb a status update pushed by a runner. Terminal statuses never
/// accept another write (I6); late/out-of-order updates return a conflict
/// signal instead of silently succeeding.
pub async fn apply_runner_update(
    db: &Database,
    request: TaskUpdateRequest,
) -> CoordinatorResult<TaskUpdateResponse> {
    let mut task = db
        .tasks()
        .await
        .get(request.task_id)?
        .ok_or_else(|| CoordinatorError::NotFound(format!("task {}", request.task_id)))?;

    if task.status.is_terminal() {
        return Ok(TaskUpdateResponse {
            applied: false,
            conflict: Some(FailureEnvelope {
                kind: FailureKind::Conflict,
                reason: format!("task {} is already in terminal state {}", task.id, task.status),
            }),
        });
    }

    let transitioned = task.try_transition(request.status);
    if request.started && task.started_at.is_none() {
        task.started_at = Some(Utc::now().timestamp());
    }
    if request.completed {
        task.completed_at = Some(Utc::now().timestamp());
    }
    if request.exit_code.is_some() {
        task.exit_code = request.exit_code;
    }
    if request.message.is_some() {
        task.error_message = request.message;
    }
    if request.tunnel_port.is_some() {
        task.tunnel_port = request.tunnel_port;
    }

    db.tasks().await.update(&task)?;

    Ok(TaskUpdateResponse {
        applied: transitioned,
        conflict: None,
    })
}
