//! The Host's control plane: scheduler, task state machine, liveness
//! monitor, environment management, and the HTTP router binding them to
//! the runner-plane and client-plane endpoints (spec.md §4.4).

mod dispatch;
mod environments;
mod errors;
mod fsm;
pub mod handlers;
mod liveness;
mod scheduler;

pub use dispatch::RunnerClientPool;
pub use environments::{PreparationError, PreparationManager};
pub use errors::{CoordinatorError, CoordinatorResult};
pub use liveness::spawn_liveness_monitor;
pub use scheduler::Scheduler;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::store::Database;

/// Shared state handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub scheduler: Arc<Scheduler>,
    pub dispatch: Arc<RunnerClientPool>,
    pub preparation: Arc<PreparationManager>,
    pub default_base_image: String,
}

/// Build the Host's HTTP router: runner plane (register/heartbeat/...),
/// client plane (submit/status/.../logs), and environment management.
pub fn build_router(state: AppState) -> Router {
    let runner_routes = Router::new()
        .route("/register", post(handlers::nodes::register))
        .route("/heartbeat", post(handlers::nodes::heartbeat));

    let task_routes = Router::new()
        .route("/tasks", post(handlers::tasks::submit))
        .route("/tasks", get(handlers::tasks::list_tasks))
        .route("/tasks/:task_id", get(handlers::tasks::status))
        .route("/tasks/:task_id/kill", post(handlers::tasks::kill))
        .route("/tasks/:task_id/pause", post(handlers::tasks::pause))
        .route("/tasks/:task_id/resume", post(handlers::tasks::resume))
        .route("/tasks/:task_id/logs", get(handlers::tasks::logs));

    let node_routes = Router::new()
        .route("/nodes", get(handlers::nodes::list_nodes))
        .route("/health", get(handlers::nodes::list_health));

    let environment_routes = Router::new()
        .route("/environments", get(handlers::environments::list_artifacts))
        .route(
            "/environments/:name/preparation",
            post(handlers::environments::create_preparation).delete(handlers::environments::delete_preparation),
        )
        .route("/environments/:name/preparation/stop", post(handlers::environments::stop_preparation))
        .route("/environments/:name/preparation/start", post(handlers::environments::start_preparation))
        .route("/environments/:name/commit", post(handlers::environments::commit_preparation));

    Router::new()
        .nest("/api/v1", runner_routes)
        .nest("/api/v1", task_routes)
        .nest("/api/v1", node_routes)
        .nest("/api/v1", environment_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}
