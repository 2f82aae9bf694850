use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use queue_cell::{queue_routes, QueueAdmissionService};
use shared_config::AppConfig;

pub fn create_router(config: Arc<AppConfig>, admission: QueueAdmissionService) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic queue API is running!" }))
        .nest("/api", queue_routes(config, admission))
}
