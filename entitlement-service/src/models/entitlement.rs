use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::{Email, EntitlementSource, SourceRecord, Tier};

/// The merged answer for one identity at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ResolvedEntitlement {
    #[schema(value_type = String)]
    pub identity: Email,
    pub tier: Tier,
    pub source: EntitlementSource,
    pub verified_at: DateTime<Utc>,
}

impl ResolvedEntitlement {
    /// Least-privileged answer, used whenever resolution cannot complete.
    pub fn unverified(identity: Email, now: DateTime<Utc>) -> Self {
        Self {
            identity,
            tier: Tier::Free,
            source: EntitlementSource::None,
            verified_at: now,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.source.is_verified()
    }
}

/// Combine the two platform answers: highest tier among active sources wins,
/// and the source tag names every platform that was active.
///
/// Argument order only labels the platforms; it never changes the tier.
pub fn merge(
    identity: Email,
    newsletter: &SourceRecord,
    marketplace: &SourceRecord,
    now: DateTime<Utc>,
) -> ResolvedEntitlement {
    let source = EntitlementSource::from_activity(newsletter.active, marketplace.active);
    let tier = newsletter.effective_tier().max(marketplace.effective_tier());

    ResolvedEntitlement {
        identity,
        tier,
        source,
        verified_at: now,
    }
}
