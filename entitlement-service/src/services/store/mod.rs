//! Persistence seams. Each concern is a trait so the resolver and handlers
//! can run against PostgreSQL in production and the in-memory store in
//! development and tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::models::{
    AuditEntry, Email, IdentityRecord, MembershipStatus, PurchaseRecord, SessionRecord,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Insert or merge into the record keyed by email. See [`IdentityRecord::absorb`].
    async fn upsert_identity(&self, record: &IdentityRecord) -> Result<(), anyhow::Error>;
    async fn find_identity(&self, email: &Email) -> Result<Option<IdentityRecord>, anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Ensure the account row exists and replace the identity's session in a
    /// single step, so a token never exists without its account.
    async fn issue_session(&self, record: &SessionRecord) -> Result<(), anyhow::Error>;
    async fn find_session_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<SessionRecord>, anyhow::Error>;
    async fn account_exists(&self, email: &Email) -> Result<bool, anyhow::Error>;
    /// Cut the identity's live session short at `at`. Returns `false` when
    /// there was no unexpired session.
    async fn expire_session(
        &self,
        email: &Email,
        at: DateTime<Utc>,
    ) -> Result<bool, anyhow::Error>;
}

#[async_trait]
pub trait PurchaseMirror: Send + Sync {
    /// Every mirrored membership for the email, in no particular order.
    async fn find_purchases(&self, email: &Email) -> Result<Vec<PurchaseRecord>, anyhow::Error>;
    /// Keyed by `membership_id`; one email may hold several memberships.
    async fn upsert_purchase(&self, record: &PurchaseRecord) -> Result<(), anyhow::Error>;
    /// Returns `false` when no mirrored membership has that id.
    async fn set_membership_status(
        &self,
        membership_id: &str,
        status: MembershipStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, anyhow::Error>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<(), anyhow::Error>;
}

/// The four stores the service writes to, usually backed by one object.
#[derive(Clone)]
pub struct Stores {
    pub identities: Arc<dyn IdentityStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub purchases: Arc<dyn PurchaseMirror>,
    pub audit: Arc<dyn AuditSink>,
}

impl Stores {
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            identities: store.clone(),
            sessions: store.clone(),
            purchases: store.clone(),
            audit: store,
        }
    }

    pub fn postgres(store: PgStore) -> Self {
        let store = Arc::new(store);
        Self {
            identities: store.clone(),
            sessions: store.clone(),
            purchases: store.clone(),
            audit: store,
        }
    }

    /// Audit writes never fail the operation being audited.
    pub async fn audit(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.record(&entry).await {
            tracing::error!(
                error = %e,
                method = entry.method.as_str(),
                action = entry.action.as_str(),
                "Failed to write audit entry"
            );
        }
    }
}
