use chrono::Duration as ChronoDuration;
use std::env;
use std::time::Duration;

use crate::error::ClientError;
use crate::models::normalize_email;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of entitlement-service.
    pub base_url: String,
    /// Operators are premium without a network round trip.
    pub operator_emails: Vec<String>,
    /// Recovery hints older than this are discarded unread.
    pub recovery_staleness: ChronoDuration,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            operator_emails: Vec::new(),
            recovery_staleness: ChronoDuration::days(30),
            request_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_operators<I, S>(mut self, emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.operator_emails = emails
            .into_iter()
            .map(|e| normalize_email(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    pub fn from_env() -> Result<Self, ClientError> {
        let base_url = env::var("ENTITLEMENT_API_URL")
            .map_err(|_| ClientError::Config("ENTITLEMENT_API_URL is not set".to_string()))?;

        let operators = env::var("OPERATOR_EMAILS").unwrap_or_default();
        let mut config = Self::new(base_url).with_operators(operators.split(','));

        if let Ok(days) = env::var("RECOVERY_STALENESS_DAYS") {
            let days: i64 = days.parse().map_err(|_| {
                ClientError::Config(format!("Invalid RECOVERY_STALENESS_DAYS: {}", days))
            })?;
            config.recovery_staleness = ChronoDuration::days(days);
        }
        if let Ok(secs) = env::var("ENTITLEMENT_CLIENT_TIMEOUT_SECONDS") {
            let secs: u64 = secs.parse().map_err(|_| {
                ClientError::Config(format!("Invalid ENTITLEMENT_CLIENT_TIMEOUT_SECONDS: {}", secs))
            })?;
            config.request_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn is_operator(&self, email: &str) -> bool {
        let email = normalize_email(email);
        self.operator_emails.iter().any(|o| *o == email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_check_is_case_insensitive() {
        let config =
            ClientConfig::new("http://localhost").with_operators([" Ops@Example.com ", ""]);
        assert!(config.is_operator("ops@example.com"));
        assert!(config.is_operator("OPS@EXAMPLE.COM"));
        assert!(!config.is_operator("member@example.com"));
        assert_eq!(config.operator_emails.len(), 1);
    }
}
