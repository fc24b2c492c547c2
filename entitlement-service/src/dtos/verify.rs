use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::models::{EntitlementSource, Tier};
use crate::services::Resolution;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyRequest {
    #[validate(length(min = 3, max = 320, message = "Email is required"))]
    #[schema(example = "member@example.com")]
    pub email: String,
}

/// Always well-formed. On any failure it carries `verified: false` and the
/// free tier.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerifyResponse {
    #[schema(example = true)]
    pub success: bool,
    #[schema(example = true)]
    pub verified: bool,
    pub tier: Tier,
    pub source: EntitlementSource,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = "rate_limited")]
    pub error: Option<String>,
}

impl VerifyResponse {
    pub fn safe_default(error: impl Into<String>) -> Self {
        Self {
            success: false,
            verified: false,
            tier: Tier::Free,
            source: EntitlementSource::None,
            metadata: serde_json::json!({}),
            session_token: None,
            expires_at: None,
            error: Some(error.into()),
        }
    }
}

impl From<Resolution> for VerifyResponse {
    fn from(resolution: Resolution) -> Self {
        let mut metadata = resolution.metadata;
        if let (Some(error), Some(obj)) =
            (&resolution.persistence_error, metadata.as_object_mut())
        {
            obj.insert(
                "persistence_error".to_string(),
                serde_json::Value::String(error.clone()),
            );
        }

        Self {
            success: true,
            verified: resolution.entitlement.is_verified(),
            tier: resolution.entitlement.tier,
            source: resolution.entitlement.source,
            metadata,
            expires_at: resolution.session_token.as_ref().map(|t| t.expires_at),
            session_token: resolution.session_token.map(|t| t.token),
            error: None,
        }
    }
}
