//! Retrying JSON HTTP client
//!
//! Grounded on the teacher's panel `HttpClient`, but pointed at a plain
//! `base_url` with no auth header — used bidirectionally: the Runner calls
//! the Coordinator's runner-plane endpoints, and the Coordinator calls a
//! Runner's control endpoints, with the same retry/backoff shape either
//! way (spec.md §4.3, "bounded-exponential-retry").

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::errors::{ApiError, ApiResult};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

pub struct HttpClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ApiResult<Self> {
        Self::with_retry(base_url, timeout, RetryPolicy::default())
    }

    pub fn with_retry(base_url: impl Into<String>, timeout: Duration, retry: RetryPolicy) -> ApiResult<Self> {
        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ApiError::InvalidUrl(
                "url must start with http:// or https://".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(ApiError::Request)?;

        Ok(Self { client, base_url, retry })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        self.request(Method::GET, path, None::<()>).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> ApiResult<T> {
        self.request(Method::POST, path, Some(body)).await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<impl Serialize>,
    ) -> ApiResult<T> {
        let url = self.url(path);
        let mut last_error: Option<ApiError> = None;

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                debug!(path, attempt, ?delay, "retrying request");
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.request(method.clone(), &url);
            if let Some(ref body) = body {
                request = request.json(body);
            }

            match self.execute(request).await {
                Ok(response) => return self.parse(response).await,
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    warn!(path, attempt, error = %e, "retryable request failure");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(ApiError::RetryExhausted(
            last_error.map(|e| e.to_string()).unwrap_or_else(|| "unknown error".to_string()),
        ))
    }

    async fn execute(&self, request: RequestBuilder) -> ApiResult<Response> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout
            } else {
                ApiError::Request(e)
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(response.text().await.unwrap_or_default()));
        }
        if status.is_server_error() || status.is_client_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Server {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn parse<T: DeserializeOwned>(&self, response: Response) -> ApiResult<T> {
        let text = response.text().await.map_err(ApiError::Request)?;
        serde_json::from_str(&text).map_err(ApiError::Parse)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.retry.base_delay * 2u32.pow(attempt - 1);
        std::cmp::min(delay, self.retry.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_url_without_scheme() {
        let result = HttpClient::new("runner0:9100", Duration::from_secs(5));
        assert!(result.is_err());
    }

    #[test]
    fn trims_trailing_slash_from_base_url() {
        let client = HttpClient::new("http://runner0:9100/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.url("run"), "http://runner0:9100/run");
    }

    #[test]
    fn backoff_doubles_until_the_cap() {
        let client = HttpClient::new("http://runner0:9100", Duration::from_secs(5)).unwrap();
        assert_eq!(client.backoff(1), Duration::from_millis(200));
        assert_eq!(client.backoff(2), Duration::from_millis(400));
        assert_eq!(client.backoff(3), Duration::from_millis(800));
    }
}
