//! Node data model
//!
//! A registered compute host. Created on first registration, mutated only by
//! heartbeats and the liveness monitor; a node row is never destroyed — a
//! re-registration resets status and capabilities in place.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Node lifecycle status (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Online => write!(f, "online"),
            NodeStatus::Offline => write!(f, "offline"),
        }
    }
}

/// One NUMA node's resources, keyed by numa id on `Node::numa`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NumaNode {
    pub core_ids: Vec<u32>,
    pub memory_bytes: u64,
}

/// A single GPU as reported by the runner's optional GPU lister.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuDescriptor {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub memory_total_bytes: u64,
}

/// Most recent runtime metrics snapshot reported via heartbeat.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub cpu_used_percent: f64,
    pub memory_used_bytes: u64,
    pub reported_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub hostname: String,
    pub url: String,
    pub total_cores: u32,
    pub total_memory_bytes: u64,
    /// Keyed by numa id.
    pub numa: HashMap<u32, NumaNode>,
    pub gpus: Vec<GpuDescriptor>,
    pub status: NodeStatus,
    pub last_heartbeat: i64,
    pub metrics: NodeMetrics,
}

impl Node {
    pub fn owns_numa(&self, numa_id: u32) -> bool {
        self.numa.contains_key(&numa_id)
    }

    pub fn owns_gpus(&self, gpu_ids: &[String]) -> bool {
        gpu_ids
            .iter()
            .all(|id| self.gpus.iter().any(|g| &g.id == id))
    }
}
