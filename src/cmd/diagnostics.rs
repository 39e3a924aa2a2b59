//! Diagnostics command - displays system and Docker information

use anyhow::Result;
use bollard::Docker;
use sysinfo::System;

use crate::system::{detect, NoGpus};

/// Run diagnostics and display system information
pub async fn run() -> Result<()> {
    println!("HakuRiver Diagnostics");
    println!("======================\n");

    println!("System Information:");
    println!("-------------------");

    let mut sys = System::new_all();
    sys.refresh_all();

    println!("  OS: {} {}", System::name().unwrap_or_default(), System::os_version().unwrap_or_default());
    println!("  Kernel: {}", System::kernel_version().unwrap_or_default());
    println!("  Hostname: {}", System::host_name().unwrap_or_default());
    println!("  CPUs: {}", sys.cpus().len());
    println!("  Total Memory: {} MB", sys.total_memory() / 1024 / 1024);
    println!("  Used Memory: {} MB", sys.used_memory() / 1024 / 1024);
    println!("  Uptime: {} seconds", System::uptime());

    println!("\nResource Inventory (as advertised at registration):");
    println!("-----------------------------------------------------");
    let inventory = detect(&NoGpus);
    println!("  Cores: {}", inventory.total_cores);
    println!("  Memory: {} MB", inventory.total_memory_bytes / 1024 / 1024);
    println!("  NUMA nodes: {}", inventory.numa.len());
    for (numa_id, node) in &inventory.numa {
        println!("    node{numa_id}: {} cores, {} MB", node.core_ids.len(), node.memory_bytes / 1024 / 1024);
    }
    println!("  GPUs: {}", inventory.gpus.len());

    println!("\nDocker Information:");
    println!("-------------------");

    match Docker::connect_with_local_defaults() {
        Ok(docker) => {
            match docker.version().await {
                Ok(version) => {
                    println!("  Version: {}", version.version.unwrap_or_default());
                    println!("  API Version: {}", version.api_version.unwrap_or_default());
                }
                Err(e) => println!("  Error getting version: {}", e),
            }

            match docker.info().await {
                Ok(info) => {
                    println!("  Containers: {}", info.containers.unwrap_or(0));
                    println!("    Running: {}", info.containers_running.unwrap_or(0));
                    println!("  Images: {}", info.images.unwrap_or(0));
                    println!("  Storage Driver: {}", info.driver.unwrap_or_default());
                }
                Err(e) => println!("  Error getting info: {}", e),
            }
        }
        Err(e) => {
            println!("  Error connecting to Docker: {}", e);
            println!("  Make sure Docker is running and accessible.");
        }
    }

    println!("\nDiagnostics complete.");
    Ok(())
}
