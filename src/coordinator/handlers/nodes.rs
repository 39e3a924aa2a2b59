//! Node registration, heartbeat, and listing handlers

use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::types::{
    HeartbeatRequest, HeartbeatResponse, RegisterRequest, RegisterResponse, TaskUpdateRequest,
};
use crate::model::{Node, NodeMetrics, NodeStatus};

use super::super::errors::CoordinatorResult;
use super::super::fsm::apply_runner_update;
use super::super::AppState;

#[derive(Debug, Serialize)]
pub struct NodeView {
    pub hostname: String,
    pub url: String,
    pub total_cores: u32,
    pub total_memory_bytes: u64,
    pub status: String,
    pub last_heartbeat: i64,
    pub cpu_used_percent: f64,
    pub memory_used_bytes: u64,
}

impl From<Node> for NodeView {
    fn from(node: Node) -> Self {
        Self {
            hostname: node.hostname,
            url: node.url,
            total_cores: node.total_cores,
            total_memory_bytes: node.total_memory_bytes,
            status: node.status.to_string(),
            last_heartbeat: node.last_heartbeat,
            cpu_used_percent: node.metrics.cpu_used_percent,
            memory_used_bytes: node.metrics.memory_used_bytes,
        }
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> CoordinatorResult<Json<RegisterResponse>> {
    let node = Node {
        hostname: request.hostname.clone(),
        url: request.url,
        total_cores: request.total_cores,
        total_memory_bytes: request.total_memory_bytes,
        numa: request.numa,
        gpus: request.gpus,
        status: NodeStatus::Online,
        last_heartbeat: Utc::now().timestamp(),
        metrics: NodeMetrics::default(),
    };

    state.db.nodes().await.upsert(&node)?;
    info!(hostname = %request.hostname, "runner registered");
    Ok(Json(RegisterResponse { accepted: true }))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatRequest>,
) -> CoordinatorResult<Json<HeartbeatResponse>> {
    let now = Utc::now().timestamp();
    state
        .db
        .nodes()
        .await
        .record_heartbeat(&request.hostname, &request.metrics, now)?;

    for finalized in request.finalized {
        let update = TaskUpdateRequest {
            task_id: finalized.task_id,
            status: finalized.status,
            exit_code: finalized.exit_code,
            message: finalized.reason,
            started: false,
            completed: true,
            tunnel_port: None,
        };
        if let Err(e) = apply_runner_update(&state.db, update).await {
            tracing::warn!(task_id = finalized.task_id, error = %e, "failed to reconcile finalized task");
        }
    }

    Ok(Json(HeartbeatResponse { acknowledged: true }))
}

pub async fn list_nodes(State(state): State<AppState>) -> CoordinatorResult<Json<Vec<NodeView>>> {
    let nodes = state.db.nodes().await.all()?;
    Ok(Json(nodes.into_iter().map(NodeView::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct HealthQuery {
    pub hostname: Option<String>,
}

pub async fn list_health(
    State(state): State<AppState>,
    Query(query): Query<HealthQuery>,
) -> CoordinatorResult<Json<Vec<NodeView>>> {
    let nodes = state.db.nodes().await.all()?;
    let filtered = nodes
        .into_iter()
        .filter(|n| query.hostname.as_deref().map_or(true, |h| h == n.hostname))
        .map(NodeView::from)
        .collect();
    Ok(Json(filtered))
}
