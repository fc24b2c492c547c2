use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{normalize_email, Tier};

/// Evidence that this device once held a premium identity. Only ever routes
/// to `NeedsRestoration`, never to an authenticated state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryHint {
    pub email: String,
    pub last_known_tier: Tier,
    pub recorded_at: DateTime<Utc>,
}

impl RecoveryHint {
    pub fn new(email: &str, last_known_tier: Tier, recorded_at: DateTime<Utc>) -> Self {
        Self {
            email: normalize_email(email),
            last_known_tier,
            recorded_at,
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        now.signed_duration_since(self.recorded_at) <= staleness
    }
}
