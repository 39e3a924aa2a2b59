//! Liveness monitor: flips stale nodes offline, their tasks to `lost`, and
//! tracks dispatch-apparently-lost suspicion (spec.md §4.4, §5).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::HeartbeatConfiguration;
use crate::model::{NodeStatus, TaskStatus};
use crate::store::{Database, StoreResult};
use crate::system::{spawn_periodic, TickerHandle};

pub fn spawn_liveness_monitor(db: Arc<Database>, heartbeat: HeartbeatConfiguration) -> TickerHandle {
    let interval = Duration::from_secs(heartbeat.interval_secs.max(1));
    spawn_periodic("liveness-monitor", interval, move || {
        let db = db.clone();
        let heartbeat = heartbeat.clone();
        async move {
            if let Err(e) = run_liveness_pass(&db, &heartbeat).await {
                error!(error = %e, "liveness pass failed");
            }
        }
    })
}

async fn run_liveness_pass(db: &Database, heartbeat: &HeartbeatConfiguration) -> StoreResult<()> {
    let now = Utc::now().timestamp();
    let window = heartbeat.liveness_window_secs() as i64;

    for node in db.nodes().await.all()? {
        if node.status != NodeStatus::Online {
            continue;
        }
        if now - node.last_heartbeat <= window {
            continue;
        }

        warn!(hostname = %node.hostname, "node heartbeat timed out, marking offline");
        db.nodes().await.set_status(&node.hostname, NodeStatus::Offline)?;

        for mut task in db
            .tasks()
            .await
            .list_by_assigned_node(&node.hostname)?
            .into_iter()
            .filter(|t| !t.status.is_terminal())
        {
            task.try_transition(TaskStatus::Lost);
            task.completed_at = Some(now);
            db.tasks().await.update(&task)?;
        }
    }

    for mut task in db.tasks().await.list_by_status(TaskStatus::Assigning)? {
        if task.started_at.is_some() {
            continue;
        }
        task.assignment_suspicion += 1;
        if task.assignment_suspicion > heartbeat.suspicion_threshold {
            info!(task_id = task.id, "dispatch apparently lost, failing task");
            task.try_transition(TaskStatus::Failed);
            task.error_message = Some("dispatch apparently lost".to_string());
            task.completed_at = Some(now);
        }
        db.tasks().await.update(&task)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommandPayload, MountSpec, Node, NodeMetrics, ResourceRequest, Task, TaskKind, TaskPayload};
    use std::collections::HashMap;

    fn sample_node(hostname: &str, last_heartbeat: i64) -> Node {
        Node {
            hostname: hostname.to_string(),
            url: format!("http://{hostname}:9100"),
            total_cores: 8,
            total_memory_bytes: 1024,
            numa: HashMap::new(),
            gpus: Vec::new(),
            status: NodeStatus::Online,
            last_heartbeat,
            metrics: NodeMetrics::default(),
        }
    }

    fn sample_task(id: u64, hostname: &str, status: TaskStatus) -> Task {
        Task {
            id,
            batch_id: 1,
            kind: TaskKind::Command,
            payload: TaskPayload::Command(CommandPayload::default()),
            resources: ResourceRequest::default(),
            environment: "default".to_string(),
            privileged: false,
            mounts: Vec::<MountSpec>::new(),
            assigned_node: Some(hostname.to_string()),
            unit_name: Some("unit".to_string()),
            stdout_path: None,
            stderr_path: None,
            exit_code: None,
            error_message: None,
            status,
            submitted_at: 0,
            started_at: None,
            completed_at: None,
            tunnel_port: None,
            assignment_suspicion: 0,
        }
    }

    #[tokio::test]
    async fn stale_node_goes_offline_and_tasks_go_lost() {
        let db = Database::open_in_memory().unwrap();
        db.nodes().await.upsert(&sample_node("alpha", 0)).unwrap();
        db.tasks().await.insert(&sample_task(1, "alpha", TaskStatus::Running)).unwrap();

        let heartbeat = HeartbeatConfiguration {
            interval_secs: 5,
            timeout_factor: 6,
            suspicion_threshold: 3,
        };
        run_liveness_pass(&db, &heartbeat).await.unwrap();

        let node = db.nodes().await.get("alpha").unwrap().unwrap();
        assert_eq!(node.status, NodeStatus::Offline);
        let task = db.tasks().await.get(1).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Lost);
        assert_eq!(task.assigned_node.as_deref(), Some("alpha"));
    }

    #[tokio::test]
    async fn assigning_task_accumulates_suspicion_then_fails() {
        let db = Database::open_in_memory().unwrap();
        db.nodes().await.upsert(&sample_node("alpha", Utc::now().timestamp())).unwrap();
        db.tasks().await.insert(&sample_task(1, "alpha", TaskStatus::Assigning)).unwrap();

        let heartbeat = HeartbeatConfiguration {
            interval_secs: 5,
            timeout_factor: 6,
            suspicion_threshold: 2,
        };

        for _ in 0..3 {
            run_liveness_pass(&db, &heartbeat).await.unwrap();
        }

        let task = db.tasks().await.get(1).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some("dispatch apparently lost"));
    }
}
