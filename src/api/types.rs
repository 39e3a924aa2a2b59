//! Wire DTOs for the runner-plane and client-plane HTTP protocols
//!
//! Task and batch ids are carried as decimal strings (spec.md §6) so
//! clients in any language round-trip them faithfully; every body is
//! additive, so unknown fields are ignored on decode (serde's default).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{CommandPayload, GpuDescriptor, MountSpec, NodeMetrics, NumaNode, TaskKind, TaskStatus, VpsPayload};

fn id_to_string(id: &u64) -> String {
    id.to_string()
}

fn id_from_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

fn opt_id_to_string(id: &Option<u64>) -> Option<String> {
    id.map(|v| v.to_string())
}

fn opt_id_from_string<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    s.map(|s| s.parse().map_err(serde::de::Error::custom)).transpose()
}

/// Error taxonomy carried in wire responses (spec.md §7), classified by
/// each domain error enum into this client-visible envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Capacity,
    Dispatch,
    Backend,
    ExecNonzero,
    Oom,
    Liveness,
    Proxy,
    Conflict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEnvelope {
    pub kind: FailureKind,
    pub reason: String,
}

// ---------------------------------------------------------------------
// Runner plane
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub hostname: String,
    pub url: String,
    pub total_cores: u32,
    pub total_memory_bytes: u64,
    pub numa: HashMap<u32, NumaNode>,
    pub gpus: Vec<GpuDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizedTask {
    #[serde(serialize_with = "id_to_string", deserialize_with = "id_from_string")]
    pub task_id: u64,
    pub status: TaskStatus,
    pub exit_code: Option<i32>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub hostname: String,
    pub metrics: NodeMetrics,
    #[serde(
        serialize_with = "ids_to_strings",
        deserialize_with = "ids_from_strings"
    )]
    pub running_ids: Vec<u64>,
    pub finalized: Vec<FinalizedTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub acknowledged: bool,
}

fn ids_to_strings<S: serde::Serializer>(ids: &[u64], serializer: S) -> Result<S::Ok, S::Error> {
    let strs: Vec<String> = ids.iter().map(|v| v.to_string()).collect();
    strs.serialize(serializer)
}

fn ids_from_strings<'de, D>(deserializer: D) -> Result<Vec<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let strs: Vec<String> = Vec::deserialize(deserializer)?;
    strs.into_iter()
        .map(|s| s.parse().map_err(serde::de::Error::custom))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskUpdateRequest {
    #[serde(serialize_with = "id_to_string", deserialize_with = "id_from_string")]
    pub task_id: u64,
    pub status: TaskStatus,
    pub exit_code: Option<i32>,
    pub message: Option<String>,
    pub started: bool,
    pub completed: bool,
    pub tunnel_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskUpdateResponse {
    pub applied: bool,
    pub conflict: Option<FailureEnvelope>,
}

// ---------------------------------------------------------------------
// Host -> Runner control plane
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(serialize_with = "id_to_string", deserialize_with = "id_from_string")]
    pub task_id: u64,
    #[serde(serialize_with = "id_to_string", deserialize_with = "id_from_string")]
    pub batch_id: u64,
    pub kind: TaskKind,
    pub command: Option<CommandPayload>,
    pub vps: Option<VpsPayload>,
    pub cores: u32,
    pub memory_bytes: Option<u64>,
    pub gpu_ids: Vec<String>,
    pub numa_id: Option<u32>,
    pub environment: String,
    pub privileged: bool,
    pub mounts: Vec<MountSpec>,
    pub unit_name: String,
    pub stdout_path: Option<String>,
    pub stderr_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub tunnel_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRequest {
    #[serde(serialize_with = "id_to_string", deserialize_with = "id_from_string")]
    pub task_id: u64,
    pub unit_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub description: String,
}

// ---------------------------------------------------------------------
// Client plane
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTarget {
    pub hostname: String,
    pub numa_id: Option<u32>,
    pub gpu_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub kind: TaskKind,
    pub command: Option<CommandPayload>,
    pub vps: Option<VpsPayload>,
    pub cores: u32,
    pub memory_bytes: Option<u64>,
    pub gpu_ids: Vec<String>,
    pub environment: String,
    pub privileged: bool,
    pub mounts: Vec<MountSpec>,
    pub targets: Vec<SubmitTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResultItem {
    #[serde(
        serialize_with = "opt_id_to_string",
        deserialize_with = "opt_id_from_string"
    )]
    pub task_id: Option<u64>,
    pub target: SubmitTarget,
    pub error: Option<FailureEnvelope>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    #[serde(serialize_with = "id_to_string", deserialize_with = "id_from_string")]
    pub batch_id: u64,
    pub results: Vec<SubmitResultItem>,
}
