use chrono::Utc;
use std::sync::Arc;

use crate::api::EntitlementApi;
use crate::config::ClientConfig;
use crate::models::Tier;
use crate::provider::{IdentityProvider, ProviderSession};
use crate::recovery::RecoveryHint;
use crate::state::{AuthStateHandle, ClientAuthState};
use crate::storage::LocalStore;

/// Everything the bootstrapper and listener share. Cheap to clone.
#[derive(Clone)]
pub struct AuthContext {
    pub provider: Arc<dyn IdentityProvider>,
    pub api: Arc<dyn EntitlementApi>,
    pub store: Arc<dyn LocalStore>,
    pub config: ClientConfig,
    pub state: Arc<AuthStateHandle>,
}

impl AuthContext {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        api: Arc<dyn EntitlementApi>,
        store: Arc<dyn LocalStore>,
        config: ClientConfig,
    ) -> Self {
        Self {
            provider,
            api,
            store,
            config,
            state: Arc::new(AuthStateHandle::new()),
        }
    }

    /// State for a live provider session. A live provider identity is always
    /// authenticated; verification only decides the tier.
    pub(crate) async fn determine_provider_state(
        &self,
        session: &ProviderSession,
    ) -> ClientAuthState {
        let identity = session.email.clone();

        if self.config.is_operator(&identity) {
            tracing::debug!("Operator identity, skipping verification");
            return ClientAuthState::ProviderSession {
                identity,
                tier: Tier::Premium,
            };
        }

        let tier = match self.api.verify(&identity).await {
            Ok(verification) => verification.entitled_tier().unwrap_or(Tier::Free),
            Err(e) => {
                tracing::warn!(error = %e, "Verification failed, continuing at free tier");
                Tier::Free
            }
        };

        ClientAuthState::ProviderSession { identity, tier }
    }

    /// Premium outcomes refresh the device's recovery hint.
    pub(crate) fn remember(&self, state: &ClientAuthState) {
        if state.tier() != Tier::Premium {
            return;
        }
        if let Some(identity) = state.identity() {
            self.store
                .store_recovery_hint(RecoveryHint::new(identity, Tier::Premium, Utc::now()));
        }
    }
}
