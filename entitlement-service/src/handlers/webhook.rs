use service_core::{
    axum::{body::Bytes, extract::State, http::HeaderMap, Json},
    error::AppError,
};

use crate::{services::WebhookOutcome, AppState};

pub const SIGNATURE_HEADER: &str = "x-marketplace-signature";

/// Marketplace membership webhook
///
/// Signed with HMAC-SHA256 over the raw body. Unhandled event types are
/// acknowledged so the platform stops retrying them.
#[utoipa::path(
    post,
    path = "/webhooks/marketplace",
    responses(
        (status = 200, description = "Event applied or acknowledged"),
        (status = 400, description = "Malformed event", body = ErrorResponse),
        (status = 401, description = "Missing or invalid signature", body = ErrorResponse)
    ),
    tag = "Webhooks"
)]
pub async fn marketplace_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if signature.is_none() {
        tracing::warn!("Missing marketplace webhook signature");
    }

    let outcome = state.webhooks.handle(&body, signature).await?;

    let (result, membership_id) = match &outcome {
        WebhookOutcome::Upserted { membership_id } => ("upserted", Some(membership_id)),
        WebhookOutcome::Deactivated { membership_id, .. } => ("deactivated", Some(membership_id)),
        WebhookOutcome::Ignored { .. } => ("ignored", None),
    };

    Ok(Json(serde_json::json!({
        "received": true,
        "result": result,
        "membership_id": membership_id,
    })))
}
