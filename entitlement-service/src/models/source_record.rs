use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use super::Tier;

/// What one external platform reported about an identity.
///
/// Produced fresh on every check and never persisted as-is; the resolver
/// folds the interesting parts into the identity record's metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRecord {
    pub active: bool,
    pub tier: Tier,
    pub segments: BTreeSet<String>,
    pub last_checked: DateTime<Utc>,
    pub raw_reference_id: Option<String>,
    /// Logical field name -> the payload path that supplied it.
    pub matched_fields: BTreeMap<String, String>,
    /// Set when the platform could not be consulted; the record is then inactive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl SourceRecord {
    /// Definitive "not a member" answer.
    pub fn inactive(now: DateTime<Utc>) -> Self {
        Self {
            active: false,
            tier: Tier::Free,
            segments: BTreeSet::new(),
            last_checked: now,
            raw_reference_id: None,
            matched_fields: BTreeMap::new(),
            degraded: None,
            details: serde_json::Map::new(),
        }
    }

    /// The platform failed to answer; treated as inactive.
    pub fn degraded(reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            degraded: Some(reason.into()),
            ..Self::inactive(now)
        }
    }

    /// Tier this record contributes to a merge: nothing unless active.
    pub fn effective_tier(&self) -> Tier {
        if self.active {
            self.tier
        } else {
            Tier::Free
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_record_contributes_free_even_with_stale_tier() {
        let mut record = SourceRecord::inactive(Utc::now());
        record.tier = Tier::Premium;
        assert_eq!(record.effective_tier(), Tier::Free);
    }

    #[test]
    fn degraded_record_is_inactive() {
        let record = SourceRecord::degraded("timeout", Utc::now());
        assert!(!record.active);
        assert!(record.is_degraded());
        assert_eq!(record.tier, Tier::Free);
    }
}
