//! Local mirror of marketplace memberships, fed by webhooks and OAuth exchanges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::{Email, Tier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Active,
    Inactive,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Active => "active",
            MembershipStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for MembershipStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MembershipStatus::Active),
            "inactive" => Ok(MembershipStatus::Inactive),
            other => Err(format!("Unknown membership status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseRecord {
    pub email: Email,
    pub membership_id: String,
    pub product_id: Option<String>,
    /// Receipt or licence reference. Some writers store sentinels such as
    /// `no_purchase` here; those never count as a purchase.
    pub purchase_reference: Option<String>,
    pub tier_hint: Option<Tier>,
    pub status: MembershipStatus,
    pub updated_at: DateTime<Utc>,
}
