//! Marketplace purchase verification against the local membership mirror.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

use super::SourceAdapter;
use crate::models::{Email, MembershipStatus, PurchaseRecord, SourceRecord, Tier};
use crate::services::metrics;
use crate::services::store::PurchaseMirror;

const SOURCE: &str = "marketplace";

#[derive(Clone)]
pub struct MarketplaceAdapter {
    mirror: Arc<dyn PurchaseMirror>,
    placeholders: Vec<String>,
}

impl MarketplaceAdapter {
    pub fn new(mirror: Arc<dyn PurchaseMirror>, placeholders: Vec<String>) -> Self {
        let placeholders = placeholders
            .into_iter()
            .map(|p| p.trim().to_lowercase())
            .collect();
        Self {
            mirror,
            placeholders,
        }
    }
}

#[async_trait]
impl SourceAdapter for MarketplaceAdapter {
    fn name(&self) -> &'static str {
        SOURCE
    }

    #[tracing::instrument(skip(self, email), fields(adapter = SOURCE))]
    async fn verify(&self, email: &Email) -> SourceRecord {
        match self.mirror.find_purchases(email).await {
            Ok(records) => evaluate_all(&records, &self.placeholders, Utc::now()),
            Err(e) => {
                tracing::warn!(error = %e, "Purchase mirror read degraded");
                metrics::record_degraded(SOURCE);
                SourceRecord::degraded(format!("purchase mirror unavailable: {}", e), Utc::now())
            }
        }
    }
}

/// Best standing across every membership on the email: the highest tier
/// among active ones, otherwise the most recently updated inactive one so its
/// details (e.g. a placeholder reference) stay visible.
pub(crate) fn evaluate_all(
    records: &[PurchaseRecord],
    placeholders: &[String],
    now: DateTime<Utc>,
) -> SourceRecord {
    let best = records
        .iter()
        .map(|record| (record, evaluate(Some(record), placeholders, now)))
        .max_by_key(|(record, evaluated)| (evaluated.active, evaluated.tier, record.updated_at));

    match best {
        Some((_, mut evaluated)) => {
            if records.len() > 1 {
                evaluated
                    .details
                    .insert("memberships".to_string(), Value::from(records.len()));
            }
            evaluated
        }
        None => SourceRecord::inactive(now),
    }
}

/// Active only for an active membership with a real purchase reference.
///
/// A placeholder reference means "no real purchase" regardless of what the
/// tier hint claims.
pub(crate) fn evaluate(
    record: Option<&PurchaseRecord>,
    placeholders: &[String],
    now: DateTime<Utc>,
) -> SourceRecord {
    let Some(record) = record else {
        return SourceRecord::inactive(now);
    };

    let mut details = serde_json::Map::new();
    details.insert(
        "membership_id".to_string(),
        Value::String(record.membership_id.clone()),
    );
    if let Some(product_id) = &record.product_id {
        details.insert("product_id".to_string(), Value::String(product_id.clone()));
    }

    let reference = record
        .purchase_reference
        .as_deref()
        .map(|r| r.trim().to_lowercase())
        .unwrap_or_default();
    let is_placeholder = placeholders.iter().any(|p| *p == reference);
    if is_placeholder {
        details.insert("placeholder_reference".to_string(), Value::Bool(true));
    }

    let active = record.status == MembershipStatus::Active && !is_placeholder;
    let tier = if active {
        record.tier_hint.unwrap_or(Tier::Premium)
    } else {
        Tier::Free
    };

    SourceRecord {
        active,
        tier,
        raw_reference_id: Some(record.membership_id.clone()),
        details,
        ..SourceRecord::inactive(now)
    }
}
