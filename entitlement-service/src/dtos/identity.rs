use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::models::{EntitlementSource, IdentityRecord, SessionRecord, Tier};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct IntrospectRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    #[schema(example = "kJ3x...")]
    pub token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IntrospectResponse {
    #[schema(example = true)]
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<EntitlementSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl IntrospectResponse {
    pub fn inactive() -> Self {
        Self {
            active: false,
            identity: None,
            tier: None,
            source: None,
            issued_at: None,
            expires_at: None,
        }
    }
}

impl From<SessionRecord> for IntrospectResponse {
    fn from(record: SessionRecord) -> Self {
        Self {
            active: true,
            identity: Some(record.identity_email.into()),
            tier: Some(record.tier),
            source: Some(record.source),
            issued_at: Some(record.issued_at),
            expires_at: Some(record.expires_at),
        }
    }
}

/// Tier and status only. Platform ids and metadata stay server-side.
#[derive(Debug, Serialize, ToSchema)]
pub struct IdentityLookupResponse {
    #[schema(example = "member@example.com")]
    pub email: String,
    pub tier: Tier,
    #[schema(example = "active")]
    pub status: String,
    pub last_verified_at: DateTime<Utc>,
}

impl From<IdentityRecord> for IdentityLookupResponse {
    fn from(record: IdentityRecord) -> Self {
        Self {
            email: record.email.into(),
            tier: record.tier,
            status: record.status.as_str().to_string(),
            last_verified_at: record.last_verified_at,
        }
    }
}
