use chrono::Utc;
use tokio::sync::OnceCell;

use crate::context::AuthContext;
use crate::models::{normalize_email, Tier};
use crate::state::{AuthPhase, ClientAuthState};
use crate::storage::CachedAltSession;

/// Runs the startup determination exactly once per client lifetime.
pub struct SessionBootstrapper {
    context: AuthContext,
    outcome: OnceCell<ClientAuthState>,
}

impl SessionBootstrapper {
    pub fn new(context: AuthContext) -> Self {
        Self {
            context,
            outcome: OnceCell::new(),
        }
    }

    /// Concurrent callers share one in-flight pass and all get its result.
    pub async fn bootstrap(&self) -> ClientAuthState {
        self.outcome
            .get_or_init(|| async {
                let guard = self.context.state.begin().await;
                let state = self.determine().await;
                self.context.remember(&state);
                self.context
                    .state
                    .publish(&guard, AuthPhase::Ready(state.clone()));
                tracing::info!(state = ?state, "Session bootstrap complete");
                state
            })
            .await
            .clone()
    }

    async fn determine(&self) -> ClientAuthState {
        let ctx = &self.context;
        let now = Utc::now();

        if let Some(session) = ctx.provider.current_session().await {
            if session.is_live(now) {
                return ctx.determine_provider_state(&session).await;
            }
            tracing::debug!("Provider session expired");
        }

        if let Some(cached) = ctx.store.cached_alt_session() {
            if let Some(state) = self.restore_alt_session(cached).await {
                return state;
            }
        }

        if let Some(hint) = ctx.store.recovery_hint() {
            if !hint.is_fresh(now, ctx.config.recovery_staleness) {
                tracing::debug!("Recovery hint is stale, dropping");
                ctx.store.clear_recovery_hint();
            } else {
                match ctx.api.lookup_identity(&hint.email).await {
                    Ok(Some(snapshot)) if snapshot.tier == Tier::Premium => {
                        return ClientAuthState::NeedsRestoration {
                            identity: hint.email,
                        };
                    }
                    Ok(_) => {
                        tracing::info!("Recovery hint no longer premium, dropping");
                        ctx.store.clear_recovery_hint();
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Recovery lookup failed, keeping hint");
                    }
                }
            }
        }

        ClientAuthState::None
    }

    /// The cached credential counts only if its marker is still a live session
    /// for the same identity and the identity still verifies. A successful
    /// verification rotates the marker to the newly issued token.
    async fn restore_alt_session(&self, cached: CachedAltSession) -> Option<ClientAuthState> {
        let ctx = &self.context;
        let identity = normalize_email(&cached.email);

        match ctx.api.introspect(&cached.session_marker).await {
            Ok(session) if session.vouches_for(&identity) => {}
            Ok(_) => {
                tracing::info!("Cached alternate session marker is not live, discarding");
                ctx.store.clear_alt_session();
                return None;
            }
            Err(e) => {
                // Keep the credential; a network blip is not a rejection.
                tracing::warn!(error = %e, "Could not check cached alternate session");
                return None;
            }
        }

        match ctx.api.verify(&identity).await {
            Ok(verification) => match verification.entitled_tier() {
                Some(tier) => {
                    if let Some(refreshed) =
                        CachedAltSession::from_verification(&identity, &verification)
                    {
                        ctx.store.store_alt_session(refreshed);
                    }
                    Some(ClientAuthState::CachedAltSession { identity, tier })
                }
                None => {
                    tracing::info!("Cached alternate session no longer verifies, discarding");
                    ctx.store.clear_alt_session();
                    None
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Could not verify cached alternate session");
                None
            }
        }
    }
}
