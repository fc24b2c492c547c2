use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Mutex;

use super::{AuditSink, IdentityStore, PurchaseMirror, SessionStore};
use crate::models::{
    AuditEntry, Email, IdentityRecord, MembershipStatus, PurchaseRecord, SessionRecord,
};

/// In-process store for development and tests.
///
/// Lock order is always `accounts` before `sessions` before `session_index`.
#[derive(Default)]
pub struct MemoryStore {
    identities: DashMap<String, IdentityRecord>,
    accounts: DashMap<String, DateTime<Utc>>,
    sessions: DashMap<String, SessionRecord>,
    session_index: DashMap<String, String>,
    /// Keyed by membership id.
    purchases: DashMap<String, PurchaseRecord>,
    /// Email to the membership ids mirrored for it.
    purchases_by_email: DashMap<String, Vec<String>>,
    audit_log: Mutex<Vec<AuditEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every audit entry written so far, oldest first.
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    pub fn session_for(&self, email: &Email) -> Option<SessionRecord> {
        self.sessions.get(email.as_str()).map(|s| s.clone())
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn upsert_identity(&self, record: &IdentityRecord) -> Result<(), anyhow::Error> {
        self.identities
            .entry(record.email.as_str().to_string())
            .and_modify(|existing| existing.absorb(record))
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn find_identity(&self, email: &Email) -> Result<Option<IdentityRecord>, anyhow::Error> {
        Ok(self.identities.get(email.as_str()).map(|r| r.clone()))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn issue_session(&self, record: &SessionRecord) -> Result<(), anyhow::Error> {
        let key = record.identity_email.as_str().to_string();

        // Holding the account entry keeps the account + session pair atomic
        // against concurrent issuers for the same identity.
        let _account = self
            .accounts
            .entry(key.clone())
            .or_insert(record.issued_at);

        if let Some(previous) = self.sessions.insert(key.clone(), record.clone()) {
            self.session_index.remove(&previous.token_hash);
        }
        self.session_index.insert(record.token_hash.clone(), key);
        Ok(())
    }

    async fn find_session_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<SessionRecord>, anyhow::Error> {
        let Some(email) = self.session_index.get(token_hash).map(|e| e.clone()) else {
            return Ok(None);
        };
        Ok(self
            .sessions
            .get(&email)
            .filter(|s| s.token_hash == token_hash)
            .map(|s| s.clone()))
    }

    async fn account_exists(&self, email: &Email) -> Result<bool, anyhow::Error> {
        Ok(self.accounts.contains_key(email.as_str()))
    }

    async fn expire_session(
        &self,
        email: &Email,
        at: DateTime<Utc>,
    ) -> Result<bool, anyhow::Error> {
        let Some(mut session) = self.sessions.get_mut(email.as_str()) else {
            return Ok(false);
        };
        if session.is_expired(at) {
            return Ok(false);
        }
        session.expires_at = at;
        Ok(true)
    }
}

#[async_trait]
impl PurchaseMirror for MemoryStore {
    async fn find_purchases(&self, email: &Email) -> Result<Vec<PurchaseRecord>, anyhow::Error> {
        let ids = self
            .purchases_by_email
            .get(email.as_str())
            .map(|ids| ids.clone())
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| self.purchases.get(id).map(|p| p.clone()))
            .collect())
    }

    async fn upsert_purchase(&self, record: &PurchaseRecord) -> Result<(), anyhow::Error> {
        let email = record.email.as_str().to_string();
        let previous = self
            .purchases
            .insert(record.membership_id.clone(), record.clone());

        // A membership that changed hands leaves the old email's index.
        if let Some(previous) = previous.filter(|p| p.email != record.email) {
            if let Some(mut ids) = self.purchases_by_email.get_mut(previous.email.as_str()) {
                ids.retain(|id| *id != record.membership_id);
            }
        }

        let mut ids = self.purchases_by_email.entry(email).or_default();
        if !ids.contains(&record.membership_id) {
            ids.push(record.membership_id.clone());
        }
        Ok(())
    }

    async fn set_membership_status(
        &self,
        membership_id: &str,
        status: MembershipStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, anyhow::Error> {
        let Some(mut entry) = self.purchases.get_mut(membership_id) else {
            return Ok(false);
        };
        entry.status = status;
        entry.updated_at = at;
        Ok(true)
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn record(&self, entry: &AuditEntry) -> Result<(), anyhow::Error> {
        self.audit_log
            .lock()
            .map_err(|e| anyhow::anyhow!("Audit log mutex poisoned: {}", e))?
            .push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntitlementSource, SessionToken, Tier};
    use chrono::Duration;

    fn email(raw: &str) -> Email {
        Email::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn issuing_creates_account_and_replaces_previous_token() {
        let store = MemoryStore::new();
        let identity = email("m@example.com");
        let now = Utc::now();

        let first = SessionToken::issue(
            identity.clone(),
            Tier::Paid,
            EntitlementSource::Newsletter,
            now,
            Duration::hours(1),
        );
        store.issue_session(&first.to_record()).await.unwrap();
        assert!(store.account_exists(&identity).await.unwrap());

        let second = SessionToken::issue(
            identity.clone(),
            Tier::Premium,
            EntitlementSource::Both,
            now,
            Duration::hours(1),
        );
        store.issue_session(&second.to_record()).await.unwrap();

        let old_hash = first.to_record().token_hash;
        let new_hash = second.to_record().token_hash;
        assert!(store.find_session_by_hash(&old_hash).await.unwrap().is_none());
        let current = store.find_session_by_hash(&new_hash).await.unwrap().unwrap();
        assert_eq!(current.tier, Tier::Premium);
    }

    #[tokio::test]
    async fn membership_status_flip_by_id() {
        let store = MemoryStore::new();
        let record = PurchaseRecord {
            email: email("buyer@example.com"),
            membership_id: "mem_1".into(),
            product_id: Some("prod_1".into()),
            purchase_reference: Some("rcpt_1".into()),
            tier_hint: None,
            status: MembershipStatus::Active,
            updated_at: Utc::now(),
        };
        store.upsert_purchase(&record).await.unwrap();

        assert!(store
            .set_membership_status("mem_1", MembershipStatus::Inactive, Utc::now())
            .await
            .unwrap());
        assert!(!store
            .set_membership_status("mem_404", MembershipStatus::Inactive, Utc::now())
            .await
            .unwrap());
        let stored = store.find_purchases(&record.email).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, MembershipStatus::Inactive);
    }

    #[tokio::test]
    async fn memberships_on_one_email_are_kept_apart() {
        let store = MemoryStore::new();
        let buyer = email("buyer@example.com");
        let membership = |id: &str, status| PurchaseRecord {
            email: buyer.clone(),
            membership_id: id.into(),
            product_id: Some("prod_1".into()),
            purchase_reference: Some(format!("rcpt_{id}")),
            tier_hint: None,
            status,
            updated_at: Utc::now(),
        };

        store.upsert_purchase(&membership("mem_1", MembershipStatus::Active)).await.unwrap();
        store.upsert_purchase(&membership("mem_2", MembershipStatus::Inactive)).await.unwrap();
        store.upsert_purchase(&membership("mem_2", MembershipStatus::Inactive)).await.unwrap();

        let mut stored = store.find_purchases(&buyer).await.unwrap();
        stored.sort_by(|a, b| a.membership_id.cmp(&b.membership_id));
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].status, MembershipStatus::Active);
        assert_eq!(stored[1].status, MembershipStatus::Inactive);
    }

    #[tokio::test]
    async fn membership_moving_email_leaves_the_old_index() {
        let store = MemoryStore::new();
        let mut record = PurchaseRecord {
            email: email("old@example.com"),
            membership_id: "mem_1".into(),
            product_id: None,
            purchase_reference: Some("rcpt_1".into()),
            tier_hint: None,
            status: MembershipStatus::Active,
            updated_at: Utc::now(),
        };
        store.upsert_purchase(&record).await.unwrap();
        record.email = email("new@example.com");
        store.upsert_purchase(&record).await.unwrap();

        assert!(store.find_purchases(&email("old@example.com")).await.unwrap().is_empty());
        assert_eq!(store.find_purchases(&email("new@example.com")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expiring_a_session_deactivates_its_token() {
        let store = MemoryStore::new();
        let identity = email("lapsed@example.com");
        let now = Utc::now();
        let token = SessionToken::issue(
            identity.clone(),
            Tier::Premium,
            EntitlementSource::Marketplace,
            now,
            Duration::hours(1),
        );
        let record = token.to_record();
        store.issue_session(&record).await.unwrap();

        assert!(store.expire_session(&identity, now).await.unwrap());
        assert!(!store.expire_session(&identity, now).await.unwrap());
        assert!(!store.expire_session(&email("nobody@example.com"), now).await.unwrap());

        let stored = store.find_session_by_hash(&record.token_hash).await.unwrap().unwrap();
        assert!(stored.is_expired(now));
    }
}
