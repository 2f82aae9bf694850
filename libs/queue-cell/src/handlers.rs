use axum::{
    extract::{Path, State},
    Extension, Json,
};
use tracing::{debug, info};
use uuid::Uuid;

use shared_models::{auth::User, error::AppError};
use shared_utils::extractor::require_role;

use crate::error::QueueError;
use crate::models::{
    AdmissionLedger, JoinQueueRequest, JoinQueueResponse, QueueEntry, QueueSummary,
    UpdateEntryStatusRequest,
};
use crate::services::QueueAdmissionService;

const JOIN_FAILED: &str = "Failed to join queue";

#[axum::debug_handler]
pub async fn join_queue(
    State(service): State<QueueAdmissionService>,
    Extension(user): Extension<User>,
    Json(request): Json<JoinQueueRequest>,
) -> Result<Json<JoinQueueResponse>, AppError> {
    info!("Join queue request for doctor {} from user {}", request.doctor_id, user.id);

    let response = service.join_queue(request).await.map_err(|e| match e {
        QueueError::Validation(msg) => AppError::ValidationError(msg),
        // The caller retries the whole join; the token is never handed out.
        QueueError::Persistence(_) | QueueError::PartialAdmission { .. } => {
            AppError::Internal(JOIN_FAILED.to_string())
        }
        other => other.into(),
    })?;

    Ok(Json(response))
}

#[axum::debug_handler]
pub async fn get_queue(
    State(service): State<QueueAdmissionService>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<String>,
) -> Result<Json<Vec<QueueEntry>>, AppError> {
    debug!("Queue listing for doctor {} requested by {}", doctor_id, user.id);

    let entries = service.waiting_queue(&doctor_id).await?;
    Ok(Json(entries))
}

#[axum::debug_handler]
pub async fn get_queue_summary(
    State(service): State<QueueAdmissionService>,
    Path(doctor_id): Path<String>,
) -> Result<Json<QueueSummary>, AppError> {
    let summary = service.queue_summary(&doctor_id).await?;
    Ok(Json(summary))
}

#[axum::debug_handler]
pub async fn update_entry_status(
    State(service): State<QueueAdmissionService>,
    Extension(user): Extension<User>,
    Path(entry_id): Path<Uuid>,
    Json(request): Json<UpdateEntryStatusRequest>,
) -> Result<Json<QueueEntry>, AppError> {
    require_role(&user, &["admin", "doctor"])?;

    let entry = service.update_entry_status(entry_id, request.status).await?;
    Ok(Json(entry))
}

#[axum::debug_handler]
pub async fn get_admission_ledger(
    State(service): State<QueueAdmissionService>,
    Extension(user): Extension<User>,
) -> Result<Json<AdmissionLedger>, AppError> {
    require_role(&user, &["admin"])?;

    Ok(Json(service.ledger().await))
}
