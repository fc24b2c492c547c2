use chrono::Utc;
use service_core::{
    axum::{
        extract::{Path, State},
        Json,
    },
    error::AppError,
    utils::hash_token,
};

use crate::{
    dtos::identity::{IdentityLookupResponse, IntrospectRequest, IntrospectResponse},
    models::Email,
    utils::ValidatedJson,
    AppState,
};

/// Check a session token issued by `/verify`
#[utoipa::path(
    post,
    path = "/session/introspect",
    request_body = IntrospectRequest,
    responses(
        (status = 200, description = "Token status", body = IntrospectResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Session"
)]
pub async fn introspect(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<IntrospectRequest>,
) -> Result<Json<IntrospectResponse>, AppError> {
    let record = state
        .stores
        .sessions
        .find_session_by_hash(&hash_token(&req.token))
        .await
        .map_err(AppError::DatabaseError)?;

    let response = match record {
        Some(record) if !record.is_expired(Utc::now()) => IntrospectResponse::from(record),
        _ => IntrospectResponse::inactive(),
    };
    Ok(Json(response))
}

/// Last known tier and status for an identity
#[utoipa::path(
    get,
    path = "/identities/{email}",
    params(("email" = String, Path, description = "Member email")),
    responses(
        (status = 200, description = "Identity found", body = IdentityLookupResponse),
        (status = 400, description = "Invalid email", body = ErrorResponse),
        (status = 404, description = "Unknown identity", body = ErrorResponse)
    ),
    tag = "Session"
)]
pub async fn get_identity(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<IdentityLookupResponse>, AppError> {
    let email = Email::parse(&email).map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?;

    let record = state
        .stores
        .identities
        .find_identity(&email)
        .await
        .map_err(AppError::DatabaseError)?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Identity not found")))?;

    Ok(Json(IdentityLookupResponse::from(record)))
}
