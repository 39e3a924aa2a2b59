//! The Runner agent: registers with the Coordinator, executes tasks
//! behind the container/scoped-process backends, and reports liveness
//! (spec.md §4.3).

pub mod handlers;
pub mod heartbeat;
pub mod registration;
pub mod tracker;

pub use heartbeat::spawn_heartbeat_loop;
pub use tracker::{FinalizedOutcome, TaskTracker};

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::system::LockerRegistry;

/// Shared state handed to every Runner axum handler.
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<TaskTracker>,
    pub task_lockers: Arc<LockerRegistry>,
    pub shared_data_dir: String,
    pub local_temp_dir: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/run", post(handlers::run))
        .route("/kill", post(handlers::kill))
        .route("/pause", post(handlers::pause))
        .route("/resume", post(handlers::resume))
        .route("/healthz", get(handlers::healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}
