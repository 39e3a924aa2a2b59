//! Client-side HTTP error types, used by both the Runner's Coordinator
//! client and the Coordinator's Runner client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("request timed out")]
    Timeout,

    #[error("all retry attempts exhausted: {0}")]
    RetryExhausted(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Request(e) => e.is_connect() || e.is_timeout(),
            ApiError::Server { status, .. } => *status >= 500,
            ApiError::Timeout => true,
            _ => false,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Server { status, .. } => Some(*status),
            ApiError::Request(e) => e.status().map(|s| s.as_u16()),
            ApiError::NotFound(_) => Some(404),
            _ => None,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
