//! Coordinator's client for calling a runner's control endpoints
//!
//! One [`HttpClient`] per node url, cached and reused across dispatches
//! (spec.md §4.3's run/kill/pause/resume contract), mirroring the same
//! retrying-client shape the runner uses to call the coordinator back.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::api::types::{ControlRequest, ControlResponse, RunRequest, RunResponse};
use crate::api::{ApiResult, HttpClient};

pub struct RunnerClientPool {
    clients: DashMap<String, Arc<HttpClient>>,
    request_timeout: Duration,
}

impl RunnerClientPool {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            request_timeout,
        }
    }

    fn client_for(&self, base_url: &str) -> ApiResult<Arc<HttpClient>> {
        if let Some(existing) = self.clients.get(base_url) {
            return Ok(existing.clone());
        }
        let client = Arc::new(HttpClient::new(base_url, self.request_timeout)?);
        self.clients.insert(base_url.to_string(), client.clone());
        Ok(client)
    }

    pub async fn run(&self, base_url: &str, request: &RunRequest) -> ApiResult<RunResponse> {
        let client = self.client_for(base_url)?;
        client.post("run", request).await
    }

    pub async fn kill(&self, base_url: &str, request: &ControlRequest) -> ApiResult<ControlResponse> {
        let client = self.client_for(base_url)?;
        client.post("kill", request).await
    }

    pub async fn pause(&self, base_url: &str, request: &ControlRequest) -> ApiResult<ControlResponse> {
        let client = self.client_for(base_url)?;
        client.post("pause", request).await
    }

    pub async fn resume(&self, base_url: &str, request: &ControlRequest) -> ApiResult<ControlResponse> {
        let client = self.client_for(base_url)?;
        client.post("resume", request).await
    }
}
