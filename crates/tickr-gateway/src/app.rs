use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tickr_core::config::TickrConfig;
use tickr_scheduler::JobService;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: TickrConfig,
    pub jobs: JobService,
}

impl AppState {
    pub fn new(config: TickrConfig, jobs: JobService) -> Self {
        Self { config, jobs }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    use crate::http::{health, jobs};

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/jobs", get(jobs::list_jobs).post(jobs::create_job))
        .route(
            "/jobs/{id}",
            get(jobs::get_job).put(jobs::edit_job).delete(jobs::delete_job),
        )
        .route("/jobs/{id}/run", post(jobs::run_job))
        .route("/jobs/{id}/logs", get(jobs::job_logs))
        .route("/jobs/{id}/executions", get(jobs::job_executions))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
