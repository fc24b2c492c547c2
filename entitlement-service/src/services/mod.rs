//! Services layer for entitlement-service.
//!
//! Source verification, tier resolution, the marketplace OAuth exchange and
//! membership webhooks, plus the stores they share.

pub mod adapters;
pub mod error;
pub mod field_lookup;
pub mod metrics;
pub mod oauth;
pub mod resolver;
pub mod store;
pub mod webhook;

pub use adapters::{MarketplaceAdapter, NewsletterAdapter, SourceAdapter};
pub use error::EntitlementError;
pub use oauth::{ClientHint, ExchangeOutcome, ExchangeRequest, FlowType, OAuthExchangeService};
pub use resolver::{Resolution, ResolverSettings, TierResolver};
pub use store::{MemoryStore, PgStore, Stores};
pub use webhook::{WebhookOutcome, WebhookService};
