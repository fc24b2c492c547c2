use service_core::{
    axum::{
        extract::{rejection::JsonRejection, State},
        http::{header, StatusCode},
        response::{IntoResponse, Response},
        Json,
    },
    error::AppError,
};
use validator::Validate;

use crate::{
    dtos::verify::{VerifyRequest, VerifyResponse},
    services::EntitlementError,
    AppState,
};

/// Resolve the caller's tier across both platforms
///
/// Every outcome, including failures, is a well-formed `VerifyResponse`;
/// anything that goes wrong reads as `verified: false` on the free tier.
#[utoipa::path(
    post,
    path = "/verify",
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Entitlement resolved", body = VerifyResponse),
        (status = 400, description = "Malformed request or email", body = VerifyResponse),
        (status = 429, description = "Too many attempts for this identity", body = VerifyResponse)
    ),
    tag = "Entitlement"
)]
#[tracing::instrument(skip_all)]
pub async fn verify(
    State(state): State<AppState>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected verify body");
            return (
                StatusCode::BAD_REQUEST,
                Json(VerifyResponse::safe_default("invalid_request")),
            )
                .into_response();
        }
    };

    if request.validate().is_err() {
        return (
            StatusCode::BAD_REQUEST,
            Json(VerifyResponse::safe_default("invalid_email")),
        )
            .into_response();
    }

    match state.resolver.resolve(&request.email).await {
        Ok(resolution) => (StatusCode::OK, Json(VerifyResponse::from(resolution))).into_response(),
        Err(EntitlementError::RateLimited { retry_after_secs }) => {
            let mut res = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(VerifyResponse::safe_default("rate_limited")),
            )
                .into_response();
            res.headers_mut()
                .insert(header::RETRY_AFTER, retry_after_secs.into());
            res
        }
        Err(e) => {
            let code = e.code();
            let status = AppError::from(e).status_code();
            (status, Json(VerifyResponse::safe_default(code))).into_response()
        }
    }
}
