//! Periodic heartbeat loop: reports live metrics, running task ids, and
//! any tasks the self-check loop finalized since the last tick (spec.md
//! §4.3, §5).

use std::sync::Arc;
use std::time::Duration;

use sysinfo::System;
use tracing::{error, warn};

use crate::api::types::{FinalizedTask, HeartbeatRequest};
use crate::api::HttpClient;
use crate::config::HeartbeatConfiguration;
use crate::model::NodeMetrics;
use crate::system::{spawn_periodic, TickerHandle};

use super::tracker::TaskTracker;

pub fn spawn_heartbeat_loop(
    client: Arc<HttpClient>,
    tracker: Arc<TaskTracker>,
    hostname: String,
    heartbeat: HeartbeatConfiguration,
) -> TickerHandle {
    let interval = Duration::from_secs(heartbeat.interval_secs.max(1));
    spawn_periodic("heartbeat", interval, move || {
        let client = client.clone();
        let tracker = tracker.clone();
        let hostname = hostname.clone();
        async move {
            if let Err(e) = send_heartbeat(&client, &tracker, &hostname).await {
                error!(error = %e, "heartbeat failed");
            }
        }
    })
}

async fn send_heartbeat(client: &HttpClient, tracker: &TaskTracker, hostname: &str) -> anyhow::Result<()> {
    let mut sys = System::new_all();
    sys.refresh_all();

    let metrics = NodeMetrics {
        cpu_used_percent: sys.global_cpu_usage() as f64,
        memory_used_bytes: sys.used_memory(),
        reported_at: chrono::Utc::now().timestamp(),
    };

    let finalized = tracker
        .poll_finalized()
        .await
        .into_iter()
        .map(|outcome| FinalizedTask {
            task_id: outcome.task_id,
            status: outcome.status,
            exit_code: outcome.exit_code,
            reason: outcome.reason,
        })
        .collect();

    let request = HeartbeatRequest {
        hostname: hostname.to_string(),
        metrics,
        running_ids: tracker.running_ids(),
        finalized,
    };

    match client.post::<_, serde_json::Value>("heartbeat", &request).await {
        Ok(_) => Ok(()),
        Err(e) => {
            warn!(error = %e, "heartbeat request failed");
            Err(e.into())
        }
    }
}
