use service_core::error::AppError;
use thiserror::Error;

use crate::models::InvalidEmail;

#[derive(Error, Debug)]
pub enum EntitlementError {
    /// Never surfaced to callers; the affected source is degraded instead.
    #[error("{source_name} unavailable: {reason}")]
    SourceUnavailable {
        source_name: &'static str,
        reason: String,
    },

    #[error("Persistence failed: {0}")]
    Persistence(#[from] anyhow::Error),

    #[error("OAuth exchange failed: {reason}")]
    OAuthExchange { reason: String },

    #[error("OAuth state did not match")]
    StateMismatch,

    #[error("Too many attempts for this identity")]
    RateLimited { retry_after_secs: u64 },

    #[error(transparent)]
    InvalidEmail(#[from] InvalidEmail),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

impl EntitlementError {
    pub fn oauth(reason: impl Into<String>) -> Self {
        EntitlementError::OAuthExchange {
            reason: reason.into(),
        }
    }

    /// Short machine-readable code for response bodies and audit metadata.
    pub fn code(&self) -> &'static str {
        match self {
            EntitlementError::SourceUnavailable { .. } => "source_unavailable",
            EntitlementError::Persistence(_) => "persistence_failure",
            EntitlementError::OAuthExchange { .. } => "oauth_exchange_failure",
            EntitlementError::StateMismatch => "state_mismatch",
            EntitlementError::RateLimited { .. } => "rate_limited",
            EntitlementError::InvalidEmail(_) => "invalid_email",
            EntitlementError::InvalidSignature => "invalid_signature",
            EntitlementError::InvalidPayload(_) => "invalid_payload",
            EntitlementError::NotConfigured(_) => "not_configured",
        }
    }
}

impl From<EntitlementError> for AppError {
    fn from(err: EntitlementError) -> Self {
        match err {
            EntitlementError::SourceUnavailable { .. } => AppError::ServiceUnavailable,
            EntitlementError::Persistence(e) => AppError::DatabaseError(e),
            EntitlementError::OAuthExchange { reason } => AppError::BadGateway(reason),
            EntitlementError::StateMismatch => {
                AppError::BadRequest(anyhow::anyhow!("OAuth state did not match"))
            }
            EntitlementError::RateLimited { retry_after_secs } => AppError::TooManyRequests(
                "Too many attempts for this identity. Please try again later.".to_string(),
                Some(retry_after_secs),
            ),
            EntitlementError::InvalidEmail(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            EntitlementError::InvalidSignature => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid webhook signature"))
            }
            EntitlementError::InvalidPayload(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            EntitlementError::NotConfigured(what) => {
                tracing::error!(component = what, "Request needs an unconfigured component");
                AppError::ServiceUnavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::axum::http::StatusCode;

    #[test]
    fn maps_to_expected_statuses() {
        let cases = [
            (EntitlementError::oauth("token endpoint 500"), StatusCode::BAD_GATEWAY),
            (EntitlementError::StateMismatch, StatusCode::BAD_REQUEST),
            (
                EntitlementError::RateLimited { retry_after_secs: 3 },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (EntitlementError::InvalidSignature, StatusCode::UNAUTHORIZED),
            (
                EntitlementError::InvalidPayload("missing type".into()),
                StatusCode::BAD_REQUEST,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status_code(), status);
        }
    }
}
