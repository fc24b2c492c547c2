use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::Serialize;
use service_core::utils::hash_token;
use utoipa::ToSchema;

use super::{Email, EntitlementSource, Tier};

/// Session credential handed to the caller. The raw token only ever exists
/// in this struct; storage keeps its hash.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionToken {
    pub token: String,
    #[schema(value_type = String)]
    pub identity: Email,
    pub tier: Tier,
    pub source: EntitlementSource,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionToken {
    pub fn issue(
        identity: Email,
        tier: Tier,
        source: EntitlementSource,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);

        Self {
            token: URL_SAFE_NO_PAD.encode(bytes),
            identity,
            tier,
            source,
            issued_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            identity_email: self.identity.clone(),
            token_hash: hash_token(&self.token),
            tier: self.tier,
            source: self.source,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
        }
    }
}

/// Persisted session row; one per identity.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub identity_email: Email,
    pub token_hash: String,
    pub tier: Tier,
    pub source: EntitlementSource,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
