use std::sync::Arc;

use axum::{
    Router,
    routing::{get, patch, post},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::QueueAdmissionService;

pub fn queue_routes(config: Arc<AppConfig>, service: QueueAdmissionService) -> Router {
    Router::new()
        .route("/join-queue", post(handlers::join_queue))
        .route("/queue/admin/ledger", get(handlers::get_admission_ledger))
        .route("/queue/entries/{entry_id}/status", patch(handlers::update_entry_status))
        .route("/queue/{doctor_id}", get(handlers::get_queue))
        .route("/queue/{doctor_id}/summary", get(handlers::get_queue_summary))
        .layer(middleware::from_fn_with_state(config, auth_middleware))
        .with_state(service)
}
