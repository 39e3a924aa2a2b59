//! Local resource introspection: cores, memory, NUMA topology, GPUs
//!
//! Runs on the Runner at registration time, and is exposed verbatim through
//! the `diagnostics` CLI subcommand on both binaries.

use std::collections::HashMap;

use sysinfo::System;

use crate::model::{GpuDescriptor, NumaNode};

/// Snapshot of everything a runner advertises to the Coordinator at
/// registration (spec.md §3, `Node`).
#[derive(Debug, Clone)]
pub struct ResourceInventory {
    pub total_cores: u32,
    pub total_memory_bytes: u64,
    pub numa: HashMap<u32, NumaNode>,
    pub gpus: Vec<GpuDescriptor>,
}

/// Pluggable GPU enumeration. The teacher's stack carries no GPU crate, so
/// the default implementation always reports none; a real deployment swaps
/// in a vendor-specific lister without touching the rest of the Runner.
pub trait GpuLister: Send + Sync {
    fn list(&self) -> Vec<GpuDescriptor>;
}

pub struct NoGpus;

impl GpuLister for NoGpus {
    fn list(&self) -> Vec<GpuDescriptor> {
        Vec::new()
    }
}

pub fn detect(gpu_lister: &dyn GpuLister) -> ResourceInventory {
    let mut sys = System::new_all();
    sys.refresh_all();

    ResourceInventory {
        total_cores: num_cpus::get() as u32,
        total_memory_bytes: sys.total_memory(),
        numa: detect_numa(),
        gpus: gpu_lister.list(),
    }
}

/// Best-effort NUMA topology read from `/sys/devices/system/node`. Returns
/// an empty map on non-Linux platforms or when the kernel interface is
/// absent (single-NUMA-node machines, containers without sysfs mounted).
#[cfg(target_os = "linux")]
fn detect_numa() -> HashMap<u32, NumaNode> {
    use std::fs;

    let mut nodes = HashMap::new();
    let Ok(entries) = fs::read_dir("/sys/devices/system/node") else {
        return nodes;
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(id_str) = name.strip_prefix("node") else { continue };
        let Ok(numa_id) = id_str.parse::<u32>() else { continue };

        let core_ids = read_cpulist(&entry.path().join("cpulist")).unwrap_or_default();
        let memory_bytes = read_meminfo_bytes(&entry.path().join("meminfo")).unwrap_or(0);

        nodes.insert(
            numa_id,
            NumaNode {
                core_ids,
                memory_bytes,
            },
        );
    }

    nodes
}

#[cfg(target_os = "linux")]
fn read_cpulist(path: &std::path::Path) -> Option<Vec<u32>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let mut ids = Vec::new();
    for range in raw.trim().split(',') {
        if range.is_empty() {
            continue;
        }
        if let Some((start, end)) = range.split_once('-') {
            let start: u32 = start.parse().ok()?;
            let end: u32 = end.parse().ok()?;
            ids.extend(start..=end);
        } else {
            ids.push(range.parse().ok()?);
        }
    }
    Some(ids)
}

#[cfg(target_os = "linux")]
fn read_meminfo_bytes(path: &std::path::Path) -> Option<u64> {
    let raw = std::fs::read_to_string(path).ok()?;
    // Format: "Node 0 MemTotal:       16384000 kB"
    let line = raw.lines().find(|l| l.contains("MemTotal"))?;
    let kb: u64 = line.split_whitespace().nth(3)?.parse().ok()?;
    Some(kb * 1024)
}

#[cfg(not(target_os = "linux"))]
fn detect_numa() -> HashMap<u32, NumaNode> {
    HashMap::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_gpus_lister_reports_empty() {
        assert!(NoGpus.list().is_empty());
    }

    #[test]
    fn detect_reports_nonzero_cores_and_memory() {
        let inventory = detect(&NoGpus);
        assert!(inventory.total_cores >= 1);
        assert!(inventory.total_memory_bytes > 0);
    }
}
