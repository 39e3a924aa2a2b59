//! Startup registration: announce this node's resources to the
//! Coordinator with bounded-exponential retry (spec.md §4.3). No task
//! work is accepted before the first successful call.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::api::types::{RegisterRequest, RegisterResponse};
use crate::api::{ApiResult, HttpClient};
use crate::config::RegistrationConfiguration;
use crate::system::ResourceInventory;

pub async fn register_with_backoff(
    client: &HttpClient,
    hostname: &str,
    advertise_url: &str,
    inventory: &ResourceInventory,
    retry: &RegistrationConfiguration,
) -> ApiResult<RegisterResponse> {
    let request = RegisterRequest {
        hostname: hostname.to_string(),
        url: advertise_url.to_string(),
        total_cores: inventory.total_cores,
        total_memory_bytes: inventory.total_memory_bytes,
        numa: inventory.numa.clone(),
        gpus: inventory.gpus.clone(),
    };

    let mut delay = Duration::from_millis(retry.base_delay_ms);
    let max_delay = Duration::from_millis(retry.max_delay_ms);
    let mut attempt = 0u32;

    loop {
        match client.post::<_, RegisterResponse>("register", &request).await {
            Ok(response) => {
                info!(hostname, attempt, "registered with coordinator");
                return Ok(response);
            }
            Err(e) if attempt < retry.max_retries => {
                attempt += 1;
                warn!(hostname, attempt, error = %e, ?delay, "registration failed, retrying");
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, max_delay);
            }
            Err(e) => {
                error!(hostname, attempts = attempt, error = %e, "registration exhausted retries");
                return Err(e);
            }
        }
    }
}
