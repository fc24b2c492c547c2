use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Entry point that produced an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditMethod {
    Verify,
    OAuthExchange,
    Webhook,
}

impl AuditMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditMethod::Verify => "verify",
            AuditMethod::OAuthExchange => "oauth_exchange",
            AuditMethod::Webhook => "webhook",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Resolve,
    RateLimited,
    TimedOut,
    Exchange,
    StateRelaxed,
    StateMismatch,
    PolicyGrant,
    MembershipUpsert,
    MembershipDeactivated,
    EventIgnored,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Resolve => "resolve",
            AuditAction::RateLimited => "rate_limited",
            AuditAction::TimedOut => "timed_out",
            AuditAction::Exchange => "exchange",
            AuditAction::StateRelaxed => "oauth_state_relaxed",
            AuditAction::StateMismatch => "oauth_state_mismatch",
            AuditAction::PolicyGrant => "policy_grant",
            AuditAction::MembershipUpsert => "membership_upsert",
            AuditAction::MembershipDeactivated => "membership_deactivated",
            AuditAction::EventIgnored => "event_ignored",
        }
    }
}

/// Append-only record of an entitlement decision. Must never carry token
/// values or platform secrets.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub identity: Option<String>,
    pub method: AuditMethod,
    pub action: AuditAction,
    pub success: bool,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        identity: Option<&str>,
        method: AuditMethod,
        action: AuditAction,
        success: bool,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: identity.map(str::to_string),
            method,
            action,
            success,
            metadata,
            created_at: Utc::now(),
        }
    }
}
