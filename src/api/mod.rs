//! HTTP wire contract shared by the Runner and the Coordinator.

pub mod client;
pub mod errors;
pub mod types;

pub use client::{HttpClient, RetryPolicy};
pub use errors::{ApiError, ApiResult};
