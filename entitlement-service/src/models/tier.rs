use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// Access tier. Ordering is privilege: `Free < Paid < Premium`.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Paid,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Paid => "paid",
            Tier::Premium => "premium",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "paid" => Ok(Tier::Paid),
            "premium" => Ok(Tier::Premium),
            other => Err(format!("Unknown tier: {}", other)),
        }
    }
}

/// Which external platform(s) recognised the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EntitlementSource {
    Newsletter,
    Marketplace,
    Both,
    None,
}

impl EntitlementSource {
    pub fn from_activity(newsletter_active: bool, marketplace_active: bool) -> Self {
        match (newsletter_active, marketplace_active) {
            (true, true) => EntitlementSource::Both,
            (true, false) => EntitlementSource::Newsletter,
            (false, true) => EntitlementSource::Marketplace,
            (false, false) => EntitlementSource::None,
        }
    }

    pub fn is_verified(&self) -> bool {
        *self != EntitlementSource::None
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntitlementSource::Newsletter => "newsletter",
            EntitlementSource::Marketplace => "marketplace",
            EntitlementSource::Both => "both",
            EntitlementSource::None => "none",
        }
    }
}

impl FromStr for EntitlementSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newsletter" => Ok(EntitlementSource::Newsletter),
            "marketplace" => Ok(EntitlementSource::Marketplace),
            "both" => Ok(EntitlementSource::Both),
            "none" => Ok(EntitlementSource::None),
            other => Err(format!("Unknown entitlement source: {}", other)),
        }
    }
}
