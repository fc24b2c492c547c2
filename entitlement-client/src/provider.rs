use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::normalize_email;

/// A session held with the primary identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSession {
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

impl ProviderSession {
    pub fn new(email: &str, expires_at: DateTime<Utc>) -> Self {
        Self {
            email: normalize_email(email),
            expires_at,
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.email.is_empty() && self.expires_at > now
    }
}

/// Sign-in state changes pushed by the provider after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    SignedIn(ProviderSession),
    /// `email` is the identity whose session ended, when the provider says.
    SignedOut { email: Option<String> },
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_session(&self) -> Option<ProviderSession>;
}
