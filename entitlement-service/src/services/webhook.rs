//! Marketplace membership webhooks feeding the local purchase mirror.

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use super::error::EntitlementError;
use super::field_lookup::FieldLookup;
use super::store::Stores;
use crate::models::{
    AuditAction, AuditEntry, AuditMethod, Email, MembershipStatus, PurchaseRecord, Tier,
};

const SOURCE: &str = "marketplace_webhook";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEventKind {
    Created,
    Updated,
    Deleted,
    Other(String),
}

impl MembershipEventKind {
    fn parse(event_type: &str) -> Self {
        match event_type.trim().to_lowercase().as_str() {
            "membership.created" | "membership_created" | "membership.went_valid" => {
                MembershipEventKind::Created
            }
            "membership.updated" | "membership_updated" => MembershipEventKind::Updated,
            "membership.deleted" | "membership_deleted" | "membership.went_invalid" => {
                MembershipEventKind::Deleted
            }
            other => MembershipEventKind::Other(other.to_string()),
        }
    }
}

/// Membership event after field-variant normalisation.
#[derive(Debug, Clone)]
pub struct MembershipEvent {
    pub kind: MembershipEventKind,
    pub membership_id: Option<String>,
    pub email: Option<String>,
    pub product_id: Option<String>,
    pub purchase_reference: Option<String>,
    pub tier_hint: Option<Tier>,
    pub status: MembershipStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Upserted { membership_id: String },
    Deactivated { membership_id: String, found: bool },
    Ignored { event_type: String },
}

#[derive(Clone)]
pub struct WebhookService {
    secret: SecretString,
    product_ids: Vec<String>,
    stores: Stores,
}

impl WebhookService {
    pub fn new(secret: SecretString, product_ids: Vec<String>, stores: Stores) -> Self {
        Self {
            secret,
            product_ids,
            stores,
        }
    }

    /// An unset secret rejects everything.
    pub fn verify_signature(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<(), EntitlementError> {
        let secret = self.secret.expose_secret();
        let signature = signature.ok_or(EntitlementError::InvalidSignature)?;
        if secret.is_empty() {
            tracing::warn!("Webhook received but no webhook secret is configured");
            return Err(EntitlementError::InvalidSignature);
        }

        match service_core::utils::verify_signature(secret, body, signature) {
            Ok(true) => Ok(()),
            Ok(false) => Err(EntitlementError::InvalidSignature),
            Err(e) => {
                tracing::error!(error = %e, "Webhook signature verification error");
                Err(EntitlementError::InvalidSignature)
            }
        }
    }

    #[tracing::instrument(skip_all)]
    pub async fn handle(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, EntitlementError> {
        self.verify_signature(body, signature)?;

        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| EntitlementError::InvalidPayload(format!("body is not JSON: {}", e)))?;
        let event = parse_event(&payload)?;

        self.apply(event).await
    }

    async fn apply(&self, event: MembershipEvent) -> Result<WebhookOutcome, EntitlementError> {
        if let MembershipEventKind::Other(event_type) = &event.kind {
            tracing::info!(event_type = %event_type, "Ignoring unhandled marketplace event");
            return Ok(self.ignore(event_type.clone()).await);
        }

        let membership_id = event
            .membership_id
            .clone()
            .ok_or_else(|| EntitlementError::InvalidPayload("membership id missing".into()))?;

        if event.kind == MembershipEventKind::Deleted {
            let found = self
                .stores
                .purchases
                .set_membership_status(&membership_id, MembershipStatus::Inactive, Utc::now())
                .await?;
            if !found {
                tracing::info!(
                    membership_id = %membership_id,
                    "Deleted membership was never mirrored"
                );
            }
            self.stores
                .audit(AuditEntry::new(
                    None,
                    AuditMethod::Webhook,
                    AuditAction::MembershipDeactivated,
                    true,
                    json!({ "membership_id": membership_id, "found": found }),
                ))
                .await;
            return Ok(WebhookOutcome::Deactivated {
                membership_id,
                found,
            });
        }

        if !self.is_our_product(event.product_id.as_deref()) {
            tracing::info!(
                product_id = ?event.product_id,
                "Ignoring membership for a product outside the allow-list"
            );
            return Ok(self.ignore("membership.other_product".to_string()).await);
        }

        let raw_email = event
            .email
            .as_deref()
            .ok_or_else(|| EntitlementError::InvalidPayload("member email missing".into()))?;
        let email = Email::parse(raw_email)?;

        let record = PurchaseRecord {
            email: email.clone(),
            membership_id: membership_id.clone(),
            product_id: event.product_id.clone(),
            purchase_reference: event.purchase_reference.clone(),
            tier_hint: event.tier_hint,
            status: event.status,
            updated_at: Utc::now(),
        };
        self.stores.purchases.upsert_purchase(&record).await?;

        tracing::info!(
            identity = %email,
            membership_id = %membership_id,
            status = record.status.as_str(),
            "Purchase mirror updated"
        );
        self.stores
            .audit(AuditEntry::new(
                Some(email.as_str()),
                AuditMethod::Webhook,
                AuditAction::MembershipUpsert,
                true,
                json!({
                    "membership_id": membership_id,
                    "product_id": record.product_id,
                    "status": record.status.as_str(),
                }),
            ))
            .await;

        Ok(WebhookOutcome::Upserted { membership_id })
    }

    fn is_our_product(&self, product_id: Option<&str>) -> bool {
        if self.product_ids.is_empty() {
            return true;
        }
        product_id.is_some_and(|id| self.product_ids.iter().any(|p| p == id))
    }

    async fn ignore(&self, event_type: String) -> WebhookOutcome {
        self.stores
            .audit(AuditEntry::new(
                None,
                AuditMethod::Webhook,
                AuditAction::EventIgnored,
                true,
                json!({ "event_type": event_type }),
            ))
            .await;
        WebhookOutcome::Ignored { event_type }
    }
}

pub(crate) fn parse_event(payload: &Value) -> Result<MembershipEvent, EntitlementError> {
    let mut fields = FieldLookup::new(SOURCE, payload);

    let event_type = fields
        .string("event_type", &["type", "action", "event"])
        .ok_or_else(|| EntitlementError::InvalidPayload("event type missing".into()))?;
    let kind = MembershipEventKind::parse(&event_type);

    let status_label = fields.string("status", &["data.status", "data.membership.status"]);
    let valid = fields.boolean("valid", &["data.valid", "data.membership.valid"]);
    let status = match (valid, status_label.as_deref().map(str::to_lowercase)) {
        (Some(false), _) => MembershipStatus::Inactive,
        (_, Some(label)) if !matches!(label.as_str(), "active" | "trialing" | "completed") => {
            MembershipStatus::Inactive
        }
        _ => MembershipStatus::Active,
    };

    Ok(MembershipEvent {
        kind,
        membership_id: fields.string(
            "membership_id",
            &["data.id", "data.membership_id", "data.membership.id"],
        ),
        email: fields.string(
            "email",
            &["data.email", "data.user.email", "data.member.email", "email"],
        ),
        product_id: fields.string(
            "product_id",
            &[
                "data.product_id",
                "data.product.id",
                "data.access_pass_id",
                "data.plan_id",
            ],
        ),
        purchase_reference: fields.string(
            "purchase_reference",
            &["data.license_key", "data.receipt_id", "data.purchase_reference"],
        ),
        tier_hint: fields
            .string("tier_hint", &["data.metadata.tier", "data.tier"])
            .and_then(|t| t.parse().ok()),
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::{MemoryStore, PurchaseMirror};
    use std::sync::Arc;

    const SECRET: &str = "whsec_test";

    fn service(store: Arc<MemoryStore>) -> WebhookService {
        WebhookService::new(
            SecretString::new(SECRET.into()),
            vec!["prod_ours".into()],
            Stores::in_memory(store),
        )
    }

    fn sign(body: &[u8]) -> String {
        service_core::utils::generate_signature(SECRET, body).unwrap()
    }

    fn created(email: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "type": "membership.created",
            "data": {
                "id": "mem_1",
                "user": {"email": email},
                "product": {"id": "prod_ours"},
                "license_key": "LK-123",
                "status": "active",
            }
        }))
        .unwrap()
    }

    #[test]
    fn parses_event_variants() {
        let event = parse_event(&json!({
            "action": "membership.updated",
            "data": {"membership_id": 42, "email": "a@b.co", "plan_id": "plan_1", "valid": false}
        }))
        .unwrap();
        assert_eq!(event.kind, MembershipEventKind::Updated);
        assert_eq!(event.membership_id.as_deref(), Some("42"));
        assert_eq!(event.product_id.as_deref(), Some("plan_1"));
        assert_eq!(event.status, MembershipStatus::Inactive);

        assert!(parse_event(&json!({"data": {}})).is_err());
    }

    #[tokio::test]
    async fn created_event_upserts_the_mirror_idempotently() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());
        let body = created("Member@Example.com");

        for _ in 0..2 {
            let outcome = service.handle(&body, Some(&sign(&body))).await.unwrap();
            assert_eq!(
                outcome,
                WebhookOutcome::Upserted {
                    membership_id: "mem_1".into()
                }
            );
        }

        let email = Email::parse("member@example.com").unwrap();
        let records = store.find_purchases(&email).await.unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.purchase_reference.as_deref(), Some("LK-123"));
        assert_eq!(record.status, MembershipStatus::Active);
    }

    #[tokio::test]
    async fn deleted_event_flips_status() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());
        let body = created("member@example.com");
        service.handle(&body, Some(&sign(&body))).await.unwrap();

        let deleted =
            serde_json::to_vec(&json!({"type": "membership.deleted", "data": {"id": "mem_1"}}))
                .unwrap();
        let outcome = service.handle(&deleted, Some(&sign(&deleted))).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Deactivated {
                membership_id: "mem_1".into(),
                found: true
            }
        );

        let email = Email::parse("member@example.com").unwrap();
        let records = store.find_purchases(&email).await.unwrap();
        assert_eq!(records[0].status, MembershipStatus::Inactive);
    }

    #[tokio::test]
    async fn expired_second_membership_leaves_the_first_alone() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());
        let body = created("member@example.com");
        service.handle(&body, Some(&sign(&body))).await.unwrap();

        let expired = serde_json::to_vec(&json!({
            "type": "membership.updated",
            "data": {
                "id": "mem_2",
                "email": "member@example.com",
                "product_id": "prod_ours",
                "license_key": "LK-456",
                "status": "expired",
            }
        }))
        .unwrap();
        service.handle(&expired, Some(&sign(&expired))).await.unwrap();

        let email = Email::parse("member@example.com").unwrap();
        let mut records = store.find_purchases(&email).await.unwrap();
        records.sort_by(|a, b| a.membership_id.cmp(&b.membership_id));
        let standing: Vec<_> = records
            .iter()
            .map(|r| (r.membership_id.as_str(), r.status))
            .collect();
        assert_eq!(
            standing,
            vec![
                ("mem_1", MembershipStatus::Active),
                ("mem_2", MembershipStatus::Inactive)
            ]
        );
    }

    #[tokio::test]
    async fn unknown_events_are_acknowledged() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());
        let body = br#"{"type":"payment.succeeded","data":{}}"#;

        let outcome = service.handle(body, Some(&sign(body))).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
        assert_eq!(store.audit_entries().len(), 1);
    }

    #[tokio::test]
    async fn other_products_are_not_mirrored() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());
        let body = serde_json::to_vec(&json!({
            "type": "membership.created",
            "data": {"id": "mem_9", "email": "x@example.com", "product_id": "prod_theirs"}
        }))
        .unwrap();

        let outcome = service.handle(&body, Some(&sign(&body))).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
        let email = Email::parse("x@example.com").unwrap();
        assert!(store.find_purchases(&email).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_or_missing_signature_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());
        let body = created("member@example.com");

        assert!(matches!(
            service.handle(&body, Some("deadbeef")).await,
            Err(EntitlementError::InvalidSignature)
        ));
        assert!(matches!(
            service.handle(&body, None).await,
            Err(EntitlementError::InvalidSignature)
        ));

        let unconfigured = WebhookService::new(
            SecretString::new(String::new()),
            Vec::new(),
            Stores::in_memory(store),
        );
        assert!(unconfigured.handle(&body, Some(&sign(&body))).await.is_err());
    }
}
