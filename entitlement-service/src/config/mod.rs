use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

use crate::services::oauth::StateRelaxationTable;

#[derive(Debug, Clone)]
pub struct EntitlementConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub newsletter: NewsletterConfig,
    pub marketplace: MarketplaceConfig,
    pub oauth: OAuthConfig,
    pub session: SessionConfig,
    pub resolver: ResolverConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "prod" | "production" => Ok(Environment::Prod),
            other => Err(format!("Unknown environment: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Unset in development means the in-memory store is used.
    pub url: Option<SecretString>,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct NewsletterConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub publication_id: String,
    pub premium_labels: Vec<String>,
    pub paid_labels: Vec<String>,
}

impl NewsletterConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.expose_secret().is_empty() && !self.publication_id.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct MarketplaceConfig {
    pub webhook_secret: SecretString,
    /// Purchase references that mean "no real purchase".
    pub placeholder_references: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
    pub authorize_url: String,
    pub token_url: String,
    pub api_base_url: String,
    /// This product's own paid offerings on the marketplace.
    pub product_ids: Vec<String>,
    /// Grant premium to any successful OAuth login, even without a matching
    /// membership. Every use is audited.
    pub assume_premium_on_oauth_success: bool,
    pub timeout_secs: u64,
    pub state_relaxations: StateRelaxationTable,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ttl_hours: i64,
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub adapter_timeout_ms: u64,
    pub resolution_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub verify_attempts: u32,
    pub verify_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

impl EntitlementConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = EntitlementConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("entitlement-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: get_optional_env("OTEL_EXPORTER_OTLP_ENDPOINT"),
            database: DatabaseConfig {
                url: if is_prod {
                    Some(SecretString::new(get_env("DATABASE_URL", None, true)?))
                } else {
                    get_optional_env("DATABASE_URL").map(SecretString::new)
                },
                max_connections: parse(
                    "DATABASE_MAX_CONNECTIONS",
                    get_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
                )?,
            },
            newsletter: NewsletterConfig {
                base_url: get_env(
                    "NEWSLETTER_API_BASE_URL",
                    Some("https://api.beehiiv.com/v2"),
                    is_prod,
                )?,
                api_key: SecretString::new(get_env("NEWSLETTER_API_KEY", Some(""), is_prod)?),
                publication_id: get_env("NEWSLETTER_PUBLICATION_ID", Some(""), is_prod)?,
                premium_labels: split_list(&get_env(
                    "NEWSLETTER_PREMIUM_LABELS",
                    Some("premium"),
                    is_prod,
                )?),
                paid_labels: split_list(&get_env("NEWSLETTER_PAID_LABELS", Some("paid"), is_prod)?),
            },
            marketplace: MarketplaceConfig {
                webhook_secret: SecretString::new(get_env(
                    "MARKETPLACE_WEBHOOK_SECRET",
                    Some(""),
                    is_prod,
                )?),
                placeholder_references: get_optional_env("MARKETPLACE_PLACEHOLDER_REFERENCES")
                    .map(|raw| split_list(&raw))
                    .unwrap_or_else(default_placeholder_references),
            },
            oauth: OAuthConfig {
                client_id: get_env("MARKETPLACE_CLIENT_ID", Some(""), is_prod)?,
                client_secret: SecretString::new(get_env(
                    "MARKETPLACE_CLIENT_SECRET",
                    Some(""),
                    is_prod,
                )?),
                redirect_uri: get_env(
                    "MARKETPLACE_REDIRECT_URI",
                    Some("http://localhost:3000/oauth/callback"),
                    is_prod,
                )?,
                authorize_url: get_env(
                    "MARKETPLACE_AUTHORIZE_URL",
                    Some("https://whop.com/oauth"),
                    is_prod,
                )?,
                token_url: get_env(
                    "MARKETPLACE_TOKEN_URL",
                    Some("https://api.whop.com/v5/oauth/token"),
                    is_prod,
                )?,
                api_base_url: get_env(
                    "MARKETPLACE_API_BASE_URL",
                    Some("https://api.whop.com/v5"),
                    is_prod,
                )?,
                product_ids: split_list(&get_env("MARKETPLACE_PRODUCT_IDS", Some(""), is_prod)?),
                assume_premium_on_oauth_success: parse(
                    "ASSUME_PREMIUM_ON_OAUTH_SUCCESS",
                    get_env(
                        "ASSUME_PREMIUM_ON_OAUTH_SUCCESS",
                        Some(DEFAULT_ASSUME_PREMIUM_ON_OAUTH_SUCCESS),
                        is_prod,
                    )?,
                )?,
                timeout_secs: parse(
                    "OAUTH_TIMEOUT_SECONDS",
                    get_env("OAUTH_TIMEOUT_SECONDS", Some("10"), is_prod)?,
                )?,
                state_relaxations: get_env("OAUTH_STATE_RELAXATIONS", Some(""), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            session: SessionConfig {
                ttl_hours: parse(
                    "SESSION_TTL_HOURS",
                    get_env("SESSION_TTL_HOURS", Some("24"), is_prod)?,
                )?,
            },
            resolver: ResolverConfig {
                adapter_timeout_ms: parse(
                    "ADAPTER_TIMEOUT_MS",
                    get_env("ADAPTER_TIMEOUT_MS", Some("3000"), is_prod)?,
                )?,
                resolution_timeout_ms: parse(
                    "RESOLUTION_TIMEOUT_MS",
                    get_env("RESOLUTION_TIMEOUT_MS", Some("5000"), is_prod)?,
                )?,
            },
            security: SecurityConfig {
                allowed_origins: split_list(&get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?),
            },
            rate_limit: RateLimitConfig {
                verify_attempts: get_env("RATE_LIMIT_VERIFY_ATTEMPTS", Some("10"), is_prod)?
                    .parse()
                    .unwrap_or(10),
                verify_window_seconds: get_env(
                    "RATE_LIMIT_VERIFY_WINDOW_SECONDS",
                    Some("60"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(60),
                global_ip_limit: get_env("RATE_LIMIT_GLOBAL_IP_LIMIT", Some("100"), is_prod)?
                    .parse()
                    .unwrap_or(100),
                global_ip_window_seconds: get_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    Some("60"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(60),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.session.ttl_hours <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_TTL_HOURS must be positive"
            )));
        }

        if self.resolver.adapter_timeout_ms == 0 || self.resolver.resolution_timeout_ms == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Resolver timeouts must be positive"
            )));
        }

        if self.oauth.timeout_secs == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OAUTH_TIMEOUT_SECONDS must be positive"
            )));
        }

        if !self.oauth.client_id.is_empty() && self.oauth.product_ids.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "MARKETPLACE_PRODUCT_IDS must list at least one product when OAuth is configured"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.marketplace.webhook_secret.expose_secret().is_empty() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "MARKETPLACE_WEBHOOK_SECRET must be set in production"
                )));
            }

            if self.oauth.assume_premium_on_oauth_success {
                tracing::warn!(
                    "ASSUME_PREMIUM_ON_OAUTH_SUCCESS is enabled: \
                     every OAuth login is granted premium"
                );
            }
        }

        Ok(())
    }
}

/// A successful marketplace login grants premium unless this is turned off.
const DEFAULT_ASSUME_PREMIUM_ON_OAUTH_SUCCESS: &str = "true";

fn default_placeholder_references() -> Vec<String> {
    ["", "none", "no_purchase", "n/a", "manual", "free"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse<T>(key: &str, value: String) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, e))
    })
}

fn get_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}
