//! Tier resolution: ask both platforms, merge, persist, issue a session.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;
use service_core::middleware::rate_limit::{check_identity, IdentityRateLimiter};
use std::sync::Arc;
use std::time::Duration;

use super::adapters::SourceAdapter;
use super::error::EntitlementError;
use super::metrics;
use super::store::Stores;
use crate::models::{
    merge, AuditAction, AuditEntry, AuditMethod, Email, EntitlementSource, IdentityRecord,
    IdentityStatus, ResolvedEntitlement, SessionToken, SourceRecord, Tier,
};

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub adapter_timeout: Duration,
    pub resolution_timeout: Duration,
    pub session_ttl: ChronoDuration,
}

/// Outcome of one resolution. Always safe to hand to a caller: on any
/// failure it carries the least-privileged entitlement.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub entitlement: ResolvedEntitlement,
    pub session_token: Option<SessionToken>,
    pub metadata: serde_json::Value,
    pub persistence_error: Option<String>,
}

#[derive(Clone)]
pub struct TierResolver {
    newsletter: Arc<dyn SourceAdapter>,
    marketplace: Arc<dyn SourceAdapter>,
    stores: Stores,
    limiter: IdentityRateLimiter,
    settings: ResolverSettings,
}

impl TierResolver {
    pub fn new(
        newsletter: Arc<dyn SourceAdapter>,
        marketplace: Arc<dyn SourceAdapter>,
        stores: Stores,
        limiter: IdentityRateLimiter,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            newsletter,
            marketplace,
            stores,
            limiter,
            settings,
        }
    }

    /// Resolve the entitlement for `raw_email`.
    ///
    /// Errors only for input problems (bad email, rate limit). Source outages,
    /// timeouts and persistence failures all produce an `Ok` resolution.
    #[tracing::instrument(skip(self, raw_email))]
    pub async fn resolve(&self, raw_email: &str) -> Result<Resolution, EntitlementError> {
        let email = Email::parse(raw_email)?;

        if let Err(retry_after_secs) = check_identity(&self.limiter, email.as_str()) {
            tracing::warn!(identity = %email, retry_after_secs, "Resolution rate limited");
            self.stores
                .audit(AuditEntry::new(
                    Some(email.as_str()),
                    AuditMethod::Verify,
                    AuditAction::RateLimited,
                    false,
                    json!({ "retry_after_secs": retry_after_secs }),
                ))
                .await;
            return Err(EntitlementError::RateLimited { retry_after_secs });
        }

        match tokio::time::timeout(self.settings.resolution_timeout, self.resolve_inner(&email))
            .await
        {
            Ok(resolution) => Ok(resolution),
            Err(_) => {
                let timeout_ms = self.settings.resolution_timeout.as_millis() as u64;
                tracing::error!(identity = %email, timeout_ms, "Resolution timed out");
                self.stores
                    .audit(AuditEntry::new(
                        Some(email.as_str()),
                        AuditMethod::Verify,
                        AuditAction::TimedOut,
                        false,
                        json!({ "timeout_ms": timeout_ms }),
                    ))
                    .await;
                metrics::record_resolution("none", "free");
                Ok(Resolution {
                    entitlement: ResolvedEntitlement::unverified(email, Utc::now()),
                    session_token: None,
                    metadata: json!({ "timed_out": true }),
                    persistence_error: None,
                })
            }
        }
    }

    async fn resolve_inner(&self, email: &Email) -> Resolution {
        let (newsletter, marketplace) = tokio::join!(
            self.verify_source(&*self.newsletter, email),
            self.verify_source(&*self.marketplace, email),
        );

        let entitlement = merge(email.clone(), &newsletter, &marketplace, Utc::now());
        let metadata = json!({
            self.newsletter.name(): source_summary(&newsletter),
            self.marketplace.name(): source_summary(&marketplace),
        });

        let mut downgraded_from = None;
        let (session_token, persistence_error) = if entitlement.is_verified() {
            match self.persist(&entitlement, &newsletter, &marketplace).await {
                Ok(token) => (Some(token), None),
                Err(e) => {
                    tracing::error!(
                        identity = %email,
                        error = %e,
                        "Failed to persist entitlement"
                    );
                    (None, Some(e.to_string()))
                }
            }
        } else if newsletter.degraded.is_none() && marketplace.degraded.is_none() {
            // Both platforms answered and neither knows the email any more.
            match self.downgrade(email, entitlement.verified_at).await {
                Ok(previous) => {
                    downgraded_from = previous;
                    (None, None)
                }
                Err(e) => {
                    tracing::error!(
                        identity = %email,
                        error = %e,
                        "Failed to downgrade lapsed identity"
                    );
                    (None, Some(e.to_string()))
                }
            }
        } else {
            (None, None)
        };

        tracing::info!(
            identity = %email,
            tier = entitlement.tier.as_str(),
            source = entitlement.source.as_str(),
            token_issued = session_token.is_some(),
            "Entitlement resolved"
        );
        metrics::record_resolution(entitlement.source.as_str(), entitlement.tier.as_str());

        self.stores
            .audit(AuditEntry::new(
                Some(email.as_str()),
                AuditMethod::Verify,
                AuditAction::Resolve,
                entitlement.is_verified() && persistence_error.is_none(),
                json!({
                    "tier": entitlement.tier,
                    "source": entitlement.source,
                    "token_issued": session_token.is_some(),
                    "degraded": {
                        self.newsletter.name(): newsletter.degraded,
                        self.marketplace.name(): marketplace.degraded,
                    },
                    "persistence_error": persistence_error,
                    "downgraded_from": downgraded_from,
                }),
            ))
            .await;

        Resolution {
            entitlement,
            session_token,
            metadata,
            persistence_error,
        }
    }

    async fn verify_source(&self, adapter: &dyn SourceAdapter, email: &Email) -> SourceRecord {
        match tokio::time::timeout(self.settings.adapter_timeout, adapter.verify(email)).await {
            Ok(record) => record,
            Err(_) => {
                let err = EntitlementError::SourceUnavailable {
                    source_name: adapter.name(),
                    reason: "timed out".to_string(),
                };
                tracing::warn!(error = %err, "Source adapter degraded");
                metrics::record_degraded(adapter.name());
                SourceRecord::degraded(err.to_string(), Utc::now())
            }
        }
    }

    /// Upsert the identity record, then issue the session together with its
    /// account row.
    async fn persist(
        &self,
        entitlement: &ResolvedEntitlement,
        newsletter: &SourceRecord,
        marketplace: &SourceRecord,
    ) -> Result<SessionToken, EntitlementError> {
        let mut record = IdentityRecord::new(
            entitlement.identity.clone(),
            entitlement.tier,
            entitlement.verified_at,
        );
        record.status = IdentityStatus::Active;
        record.newsletter_id = newsletter
            .active
            .then(|| newsletter.raw_reference_id.clone())
            .flatten();
        record.marketplace_id = marketplace
            .active
            .then(|| marketplace.raw_reference_id.clone())
            .flatten();
        record.metadata = json!({
            "segments": newsletter.segments,
            "purchase_details": marketplace.details,
            "source": entitlement.source,
        });

        self.stores.identities.upsert_identity(&record).await?;

        let token = SessionToken::issue(
            entitlement.identity.clone(),
            entitlement.tier,
            entitlement.source,
            entitlement.verified_at,
            self.settings.session_ttl,
        );
        self.stores.sessions.issue_session(&token.to_record()).await?;

        Ok(token)
    }

    /// Drop a stored identity that no platform vouches for any more to
    /// free/inactive and end its live session. Unknown emails are left
    /// unwritten. Returns the tier the record held before the downgrade.
    async fn downgrade(
        &self,
        email: &Email,
        now: DateTime<Utc>,
    ) -> Result<Option<Tier>, EntitlementError> {
        let Some(existing) = self.stores.identities.find_identity(email).await? else {
            return Ok(None);
        };
        if existing.tier == Tier::Free && existing.status == IdentityStatus::Inactive {
            return Ok(None);
        }

        let mut record = IdentityRecord::new(email.clone(), Tier::Free, now);
        record.status = IdentityStatus::Inactive;
        record.metadata = json!({
            "source": EntitlementSource::None,
            "downgraded_from": existing.tier,
        });
        self.stores.identities.upsert_identity(&record).await?;

        let session_ended = self.stores.sessions.expire_session(email, now).await?;
        tracing::info!(
            identity = %email,
            previous_tier = existing.tier.as_str(),
            session_ended,
            "Lapsed identity downgraded"
        );

        Ok(Some(existing.tier))
    }
}

fn source_summary(record: &SourceRecord) -> serde_json::Value {
    json!({
        "active": record.active,
        "tier": record.tier,
        "segments": record.segments,
        "reference_id": record.raw_reference_id,
        "matched_fields": record.matched_fields,
        "degraded": record.degraded,
    })
}
