//! Newsletter platform subscriber lookup.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde_json::Value;
use service_core::observability::TracedClientExt;
use std::time::Duration;

use super::SourceAdapter;
use crate::config::NewsletterConfig;
use crate::models::{Email, SourceRecord, Tier};
use crate::services::field_lookup::FieldLookup;
use crate::services::metrics;

const SOURCE: &str = "newsletter";

const STATUS_VARIANTS: &[&str] = &["data.status", "status", "data.subscription_status"];
const TIER_VARIANTS: &[&str] = &[
    "data.subscription_premium_tiers",
    "data.subscription_tier",
    "subscription_tier",
    "tier",
];
const SEGMENT_VARIANTS: &[&str] = &["data.tags", "data.segments", "tags"];
const ID_VARIANTS: &[&str] = &["data.id", "id"];

#[derive(Clone)]
pub struct NewsletterAdapter {
    client: Client,
    config: NewsletterConfig,
}

impl NewsletterAdapter {
    pub fn new(config: NewsletterConfig, timeout: Duration) -> Result<Self, anyhow::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, config })
    }

    async fn fetch(&self, email: &Email) -> Result<SourceRecord, anyhow::Error> {
        if !self.config.is_configured() {
            return Err(anyhow!("newsletter credentials not configured"));
        }

        let url = format!(
            "{}/publications/{}/subscriptions/by_email/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.publication_id,
            urlencoding::encode(email.as_str())
        );

        let response = self
            .client
            .traced_get(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!("Not a newsletter subscriber");
            return Ok(SourceRecord::inactive(Utc::now()));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(anyhow!("newsletter platform rate limited the lookup"));
        }
        if !status.is_success() {
            return Err(anyhow!("newsletter platform returned {}", status));
        }

        let body: Value = response.json().await?;
        Ok(parse_subscriber(&body, &self.config, Utc::now()))
    }
}

#[async_trait]
impl SourceAdapter for NewsletterAdapter {
    fn name(&self) -> &'static str {
        SOURCE
    }

    #[tracing::instrument(skip(self, email), fields(adapter = SOURCE))]
    async fn verify(&self, email: &Email) -> SourceRecord {
        match self.fetch(email).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "Newsletter lookup degraded");
                metrics::record_degraded(SOURCE);
                SourceRecord::degraded(e.to_string(), Utc::now())
            }
        }
    }
}

/// Turn a subscriber payload into a record. Active iff the status label is
/// `active`; tier comes from the tier labels, then from segment labels.
pub(crate) fn parse_subscriber(
    body: &Value,
    config: &NewsletterConfig,
    now: DateTime<Utc>,
) -> SourceRecord {
    let mut fields = FieldLookup::new(SOURCE, body);

    let status = fields.string("status", STATUS_VARIANTS);
    let tier_labels = fields.labels("tier", TIER_VARIANTS);
    let segments = fields.labels("segments", SEGMENT_VARIANTS);
    let subscriber_id = fields.string("id", ID_VARIANTS);

    let active = status
        .as_deref()
        .map(|s| s.trim().eq_ignore_ascii_case("active"))
        .unwrap_or(false);

    let tier = if active {
        tier_for_labels(tier_labels.iter().chain(segments.iter()), config)
    } else {
        Tier::Free
    };

    let mut details = serde_json::Map::new();
    if let Some(status) = status {
        details.insert("status".to_string(), Value::String(status));
    }
    if !tier_labels.is_empty() {
        details.insert("tier_labels".to_string(), serde_json::json!(tier_labels));
    }

    SourceRecord {
        active,
        tier,
        segments: segments.into_iter().collect(),
        last_checked: now,
        raw_reference_id: subscriber_id,
        matched_fields: fields.into_matched_fields(),
        degraded: None,
        details,
    }
}

fn tier_for_labels<'a>(
    labels: impl Iterator<Item = &'a String>,
    config: &NewsletterConfig,
) -> Tier {
    let matches = |label: &str, set: &[String]| set.iter().any(|l| l.eq_ignore_ascii_case(label));

    labels
        .map(|label| {
            let label = label.trim();
            if matches(label, &config.premium_labels) {
                Tier::Premium
            } else if matches(label, &config.paid_labels) {
                Tier::Paid
            } else {
                Tier::Free
            }
        })
        .max()
        .unwrap_or(Tier::Free)
}
