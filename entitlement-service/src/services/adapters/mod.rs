//! Verifiers for the two external subscription platforms.

mod marketplace;
mod newsletter;

use async_trait::async_trait;

use crate::models::{Email, SourceRecord};

pub use marketplace::MarketplaceAdapter;
pub use newsletter::NewsletterAdapter;

/// One external subscription platform.
///
/// `verify` cannot fail: any problem reaching or reading the platform comes
/// back as an inactive record with `degraded` set.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &'static str;
    async fn verify(&self, email: &Email) -> SourceRecord;
}
