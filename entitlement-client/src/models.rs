use serde::{Deserialize, Serialize};
use std::fmt;

/// Access tier as the service reports it. Ordered `Free < Paid < Premium`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
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

/// The subset of the `/verify` response the client acts on.
#[derive(Debug, Clone, Deserialize)]
pub struct Verification {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Verification {
    /// Verified at a tier; anything else reads as unverified free.
    pub fn entitled_tier(&self) -> Option<Tier> {
        (self.success && self.verified).then_some(self.tier)
    }
}

/// `GET /identities/{email}`.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentitySnapshot {
    pub email: String,
    pub tier: Tier,
    pub status: String,
}

/// `POST /session/introspect`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionIntrospection {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub tier: Option<Tier>,
}

impl SessionIntrospection {
    /// Live and issued to `email`.
    pub fn vouches_for(&self, email: &str) -> bool {
        self.active
            && self
                .identity
                .as_deref()
                .is_some_and(|identity| normalize_email(identity) == normalize_email(email))
    }
}

/// Trimmed, lowercased email used for every comparison on the client.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}
