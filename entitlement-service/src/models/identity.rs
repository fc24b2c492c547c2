//! Denormalised identity record: a read-through cache of what the external
//! platforms last said about an email.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;

use super::{Email, Tier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum IdentityStatus {
    Active,
    Inactive,
}

impl IdentityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityStatus::Active => "active",
            IdentityStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for IdentityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(IdentityStatus::Active),
            "inactive" => Ok(IdentityStatus::Inactive),
            other => Err(format!("Unknown identity status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityRecord {
    pub email: Email,
    pub tier: Tier,
    pub status: IdentityStatus,
    pub newsletter_id: Option<String>,
    pub marketplace_id: Option<String>,
    pub last_verified_at: DateTime<Utc>,
    /// Shallow-merged on upsert: keys present in the new record replace old ones.
    pub metadata: serde_json::Value,
}

impl IdentityRecord {
    pub fn new(email: Email, tier: Tier, now: DateTime<Utc>) -> Self {
        Self {
            email,
            tier,
            status: IdentityStatus::Active,
            newsletter_id: None,
            marketplace_id: None,
            last_verified_at: now,
            metadata: serde_json::json!({}),
        }
    }

    /// Apply an upsert on top of this record.
    ///
    /// Platform ids survive when the incoming record does not carry them, and
    /// metadata is merged key-by-key so one writer does not erase the other's
    /// fields.
    pub fn absorb(&mut self, incoming: &IdentityRecord) {
        self.tier = incoming.tier;
        self.status = incoming.status;
        self.last_verified_at = incoming.last_verified_at;
        if incoming.newsletter_id.is_some() {
            self.newsletter_id = incoming.newsletter_id.clone();
        }
        if incoming.marketplace_id.is_some() {
            self.marketplace_id = incoming.marketplace_id.clone();
        }
        match (self.metadata.as_object_mut(), incoming.metadata.as_object()) {
            (Some(existing), Some(new)) => {
                for (key, value) in new {
                    existing.insert(key.clone(), value.clone());
                }
            }
            _ => self.metadata = incoming.metadata.clone(),
        }
    }
}
