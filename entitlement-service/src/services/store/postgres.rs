//! PostgreSQL-backed stores.
//!
//! Every writer upserts with `ON CONFLICT ... DO UPDATE`; nothing is deleted
//! and re-inserted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use std::time::Duration;

use super::{AuditSink, IdentityStore, PurchaseMirror, SessionStore};
use crate::config::DatabaseConfig;
use crate::models::{
    AuditEntry, Email, IdentityRecord, MembershipStatus, PurchaseRecord, SessionRecord,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, anyhow::Error> {
        let url = config
            .url
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not configured"))?;
        tracing::info!("Connecting to PostgreSQL...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(url.expose_secret())
            .await?;

        tracing::info!("Successfully connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    pub async fn run_migrations(&self) -> Result<(), anyhow::Error> {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;
        tracing::info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Row types
// ============================================================================

#[derive(Debug, FromRow)]
struct IdentityRow {
    email: String,
    tier: String,
    status: String,
    newsletter_id: Option<String>,
    marketplace_id: Option<String>,
    last_verified_at: DateTime<Utc>,
    metadata: Json<serde_json::Value>,
}

impl TryFrom<IdentityRow> for IdentityRecord {
    type Error = anyhow::Error;

    fn try_from(row: IdentityRow) -> Result<Self, Self::Error> {
        Ok(IdentityRecord {
            email: Email::parse(&row.email)?,
            tier: row.tier.parse().map_err(anyhow::Error::msg)?,
            status: row.status.parse().map_err(anyhow::Error::msg)?,
            newsletter_id: row.newsletter_id,
            marketplace_id: row.marketplace_id,
            last_verified_at: row.last_verified_at,
            metadata: row.metadata.0,
        })
    }
}

#[derive(Debug, FromRow)]
struct SessionRow {
    identity_email: String,
    token_hash: String,
    tier: String,
    source: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for SessionRecord {
    type Error = anyhow::Error;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(SessionRecord {
            identity_email: Email::parse(&row.identity_email)?,
            token_hash: row.token_hash,
            tier: row.tier.parse().map_err(anyhow::Error::msg)?,
            source: row.source.parse().map_err(anyhow::Error::msg)?,
            issued_at: row.issued_at,
            expires_at: row.expires_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PurchaseRow {
    email: String,
    membership_id: String,
    product_id: Option<String>,
    purchase_reference: Option<String>,
    tier_hint: Option<String>,
    status: String,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PurchaseRow> for PurchaseRecord {
    type Error = anyhow::Error;

    fn try_from(row: PurchaseRow) -> Result<Self, Self::Error> {
        let tier_hint = match row.tier_hint {
            Some(hint) => Some(hint.parse().map_err(anyhow::Error::msg)?),
            None => None,
        };
        Ok(PurchaseRecord {
            email: Email::parse(&row.email)?,
            membership_id: row.membership_id,
            product_id: row.product_id,
            purchase_reference: row.purchase_reference,
            tier_hint,
            status: row.status.parse().map_err(anyhow::Error::msg)?,
            updated_at: row.updated_at,
        })
    }
}

// ============================================================================
// Store implementations
// ============================================================================

#[async_trait]
impl IdentityStore for PgStore {
    async fn upsert_identity(&self, record: &IdentityRecord) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO identity_records
                (email, tier, status, newsletter_id, marketplace_id, last_verified_at, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (email) DO UPDATE SET
                tier = EXCLUDED.tier,
                status = EXCLUDED.status,
                newsletter_id = COALESCE(EXCLUDED.newsletter_id, identity_records.newsletter_id),
                marketplace_id = COALESCE(EXCLUDED.marketplace_id, identity_records.marketplace_id),
                last_verified_at = EXCLUDED.last_verified_at,
                metadata = identity_records.metadata || EXCLUDED.metadata
            "#,
        )
        .bind(record.email.as_str())
        .bind(record.tier.as_str())
        .bind(record.status.as_str())
        .bind(&record.newsletter_id)
        .bind(&record.marketplace_id)
        .bind(record.last_verified_at)
        .bind(Json(&record.metadata))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_identity(&self, email: &Email) -> Result<Option<IdentityRecord>, anyhow::Error> {
        sqlx::query_as::<_, IdentityRow>("SELECT * FROM identity_records WHERE email = $1")
            .bind(email.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(IdentityRecord::try_from)
            .transpose()
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            anyhow::anyhow!("Database health check failed: {}", e)
        })?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn issue_session(&self, record: &SessionRecord) -> Result<(), anyhow::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO accounts (email, created_at) VALUES ($1, $2) \
             ON CONFLICT (email) DO NOTHING",
        )
        .bind(record.identity_email.as_str())
        .bind(record.issued_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO session_records
                (identity_email, token_hash, tier, source, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (identity_email) DO UPDATE SET
                token_hash = EXCLUDED.token_hash,
                tier = EXCLUDED.tier,
                source = EXCLUDED.source,
                issued_at = EXCLUDED.issued_at,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(record.identity_email.as_str())
        .bind(&record.token_hash)
        .bind(record.tier.as_str())
        .bind(record.source.as_str())
        .bind(record.issued_at)
        .bind(record.expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_session_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<SessionRecord>, anyhow::Error> {
        sqlx::query_as::<_, SessionRow>("SELECT * FROM session_records WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?
            .map(SessionRecord::try_from)
            .transpose()
    }

    async fn account_exists(&self, email: &Email) -> Result<bool, anyhow::Error> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM accounts WHERE email = $1)")
                .bind(email.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn expire_session(
        &self,
        email: &Email,
        at: DateTime<Utc>,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            "UPDATE session_records SET expires_at = $2 \
             WHERE identity_email = $1 AND expires_at > $2",
        )
        .bind(email.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl PurchaseMirror for PgStore {
    async fn find_purchases(&self, email: &Email) -> Result<Vec<PurchaseRecord>, anyhow::Error> {
        sqlx::query_as::<_, PurchaseRow>("SELECT * FROM purchase_mirror WHERE email = $1")
            .bind(email.as_str())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(PurchaseRecord::try_from)
            .collect()
    }

    async fn upsert_purchase(&self, record: &PurchaseRecord) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO purchase_mirror
                (email, membership_id, product_id, purchase_reference,
                 tier_hint, status, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (membership_id) DO UPDATE SET
                email = EXCLUDED.email,
                product_id = EXCLUDED.product_id,
                purchase_reference = EXCLUDED.purchase_reference,
                tier_hint = EXCLUDED.tier_hint,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.email.as_str())
        .bind(&record.membership_id)
        .bind(&record.product_id)
        .bind(&record.purchase_reference)
        .bind(record.tier_hint.map(|t| t.as_str()))
        .bind(record.status.as_str())
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_membership_status(
        &self,
        membership_id: &str,
        status: MembershipStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            "UPDATE purchase_mirror SET status = $1, updated_at = $2 WHERE membership_id = $3",
        )
        .bind(status.as_str())
        .bind(at)
        .bind(membership_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AuditSink for PgStore {
    async fn record(&self, entry: &AuditEntry) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, identity, method, action, success, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.identity)
        .bind(entry.method.as_str())
        .bind(entry.action.as_str())
        .bind(entry.success)
        .bind(Json(&entry.metadata))
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tier;
    use secrecy::SecretString;

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL (DATABASE_URL)
    async fn upsert_merges_metadata_and_keeps_ids() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
        let config = DatabaseConfig {
            url: Some(SecretString::new(url)),
            max_connections: 2,
        };
        let store = PgStore::connect(&config).await.unwrap();
        store.run_migrations().await.unwrap();

        let email = Email::parse(&format!("pg-{}@example.com", uuid::Uuid::new_v4())).unwrap();
        let mut first = IdentityRecord::new(email.clone(), Tier::Premium, Utc::now());
        first.marketplace_id = Some("user_1".into());
        first.metadata = serde_json::json!({"tier_basis": "verified_purchase"});
        store.upsert_identity(&first).await.unwrap();

        let mut second = IdentityRecord::new(email.clone(), Tier::Paid, Utc::now());
        second.metadata = serde_json::json!({"segments": ["vip"]});
        store.upsert_identity(&second).await.unwrap();

        let stored = store.find_identity(&email).await.unwrap().unwrap();
        assert_eq!(stored.tier, Tier::Paid);
        assert_eq!(stored.marketplace_id.as_deref(), Some("user_1"));
        assert_eq!(stored.metadata["tier_basis"], "verified_purchase");
        assert_eq!(stored.metadata["segments"][0], "vip");
    }
}
