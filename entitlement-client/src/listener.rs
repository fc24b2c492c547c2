use chrono::Utc;
use std::sync::Mutex;
use tokio::sync::MutexGuard;

use crate::context::AuthContext;
use crate::models::normalize_email;
use crate::provider::ProviderEvent;
use crate::state::{AuthPhase, ClientAuthState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerOutcome {
    Applied(ClientAuthState),
    Ignored,
    /// Arrived during another transition and was superseded by a later event
    /// before it could run.
    Deferred,
}

/// Applies provider sign-in/sign-out events to the published auth state.
///
/// Events never run inside another transition. One that arrives while a
/// transition is in flight is parked; later arrivals replace it, and the
/// parked event is applied against the settled state once the lock frees.
pub struct AuthEventListener {
    context: AuthContext,
    pending: Mutex<Option<ProviderEvent>>,
}

impl AuthEventListener {
    pub fn new(context: AuthContext) -> Self {
        Self {
            context,
            pending: Mutex::new(None),
        }
    }

    pub async fn on_event(&self, event: ProviderEvent) -> ListenerOutcome {
        if let Ok(guard) = self.context.state.try_begin() {
            // Left behind only by a waiter that was cancelled; it is older than `event`.
            self.take_parked();
            return self.apply(&guard, event).await;
        }

        if !self.park(event) {
            tracing::debug!("Auth transition in progress, replaced parked event");
            return ListenerOutcome::Deferred;
        }

        tracing::debug!("Auth transition in progress, waiting to apply event");
        let guard = self.context.state.begin().await;
        match self.take_parked() {
            Some(event) => self.apply(&guard, event).await,
            None => ListenerOutcome::Ignored,
        }
    }

    /// Returns true when the slot was empty, i.e. this caller must wait.
    fn park(&self, event: ProviderEvent) -> bool {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending.replace(event).is_none()
    }

    fn take_parked(&self) -> Option<ProviderEvent> {
        match self.pending.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    async fn apply(&self, guard: &MutexGuard<'_, ()>, event: ProviderEvent) -> ListenerOutcome {
        let current = self.context.state.current();

        match event {
            ProviderEvent::SignedIn(session) => {
                if !session.is_live(Utc::now()) {
                    tracing::debug!("Ignoring sign-in for an expired provider session");
                    return ListenerOutcome::Ignored;
                }
                if let AuthPhase::Ready(ClientAuthState::ProviderSession { identity, .. }) =
                    &current
                {
                    if *identity == session.email {
                        return ListenerOutcome::Ignored;
                    }
                }

                self.context.state.publish(guard, AuthPhase::Loading);
                let state = self.context.determine_provider_state(&session).await;
                self.context.remember(&state);
                self.context
                    .state
                    .publish(guard, AuthPhase::Ready(state.clone()));
                tracing::info!(tier = %state.tier(), "Provider sign-in applied");
                ListenerOutcome::Applied(state)
            }
            ProviderEvent::SignedOut { email } => {
                let AuthPhase::Ready(ClientAuthState::ProviderSession { identity, .. }) =
                    &current
                else {
                    return ListenerOutcome::Ignored;
                };
                if let Some(email) = email {
                    if normalize_email(&email) != *identity {
                        return ListenerOutcome::Ignored;
                    }
                }

                self.context
                    .state
                    .publish(guard, AuthPhase::Ready(ClientAuthState::None));
                tracing::info!("Provider sign-out applied");
                ListenerOutcome::Applied(ClientAuthState::None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::tests::{alt, context, live, FakeApi, FakeProvider};
    use crate::bootstrap::SessionBootstrapper;
    use crate::models::Tier;
    use crate::provider::ProviderSession;
    use crate::storage::{LocalStore, MemoryLocalStore};
    use std::sync::Arc;
    use std::time::Duration;

    fn slow_api() -> FakeApi {
        FakeApi {
            delay: Some(Duration::from_millis(100)),
            ..FakeApi::default()
        }
    }

    #[tokio::test]
    async fn sign_in_resolves_tier() {
        let api = Arc::new(FakeApi::default().with_tier("vip@example.com", Tier::Premium));
        let store = Arc::new(MemoryLocalStore::new());
        let ctx = context(FakeProvider::default(), api, store.clone());
        SessionBootstrapper::new(ctx.clone()).bootstrap().await;
        let listener = AuthEventListener::new(ctx.clone());

        let outcome = listener
            .on_event(ProviderEvent::SignedIn(live("vip@example.com")))
            .await;

        let expected = ClientAuthState::ProviderSession {
            identity: "vip@example.com".into(),
            tier: Tier::Premium,
        };
        assert_eq!(outcome, ListenerOutcome::Applied(expected.clone()));
        assert_eq!(ctx.state.current(), AuthPhase::Ready(expected));
        assert!(store.recovery_hint().is_some());
    }

    #[tokio::test]
    async fn duplicate_sign_in_is_ignored() {
        let api = Arc::new(FakeApi::default().with_tier("paid@example.com", Tier::Paid));
        let ctx = context(
            FakeProvider { session: Some(live("paid@example.com")) },
            api.clone(),
            Arc::new(MemoryLocalStore::new()),
        );
        SessionBootstrapper::new(ctx.clone()).bootstrap().await;
        let listener = AuthEventListener::new(ctx);

        let outcome = listener
            .on_event(ProviderEvent::SignedIn(live("Paid@Example.com")))
            .await;

        assert_eq!(outcome, ListenerOutcome::Ignored);
        assert_eq!(api.verify_calls(), 1);
    }

    #[tokio::test]
    async fn expired_sign_in_is_ignored() {
        let api = Arc::new(FakeApi::default().with_tier("late@example.com", Tier::Premium));
        let ctx = context(FakeProvider::default(), api.clone(), Arc::new(MemoryLocalStore::new()));
        SessionBootstrapper::new(ctx.clone()).bootstrap().await;
        let listener = AuthEventListener::new(ctx.clone());

        let expired = ProviderSession::new(
            "late@example.com",
            chrono::Utc::now() - chrono::Duration::minutes(1),
        );
        let outcome = listener.on_event(ProviderEvent::SignedIn(expired)).await;

        assert_eq!(outcome, ListenerOutcome::Ignored);
        assert_eq!(api.verify_calls(), 0);
        assert_eq!(ctx.state.current(), AuthPhase::Ready(ClientAuthState::None));
    }

    #[tokio::test]
    async fn event_during_a_transition_runs_after_it() {
        let api = Arc::new(slow_api().with_tier("paid@example.com", Tier::Paid));
        let ctx = context(FakeProvider::default(), api.clone(), Arc::new(MemoryLocalStore::new()));
        let listener = Arc::new(AuthEventListener::new(ctx.clone()));

        let first = {
            let listener = listener.clone();
            tokio::spawn(async move {
                listener
                    .on_event(ProviderEvent::SignedIn(live("paid@example.com")))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ctx.state.current(), AuthPhase::Loading);

        let second = listener
            .on_event(ProviderEvent::SignedOut { email: None })
            .await;

        assert!(matches!(first.await.unwrap(), ListenerOutcome::Applied(_)));
        assert_eq!(second, ListenerOutcome::Applied(ClientAuthState::None));
        assert_eq!(ctx.state.current(), AuthPhase::Ready(ClientAuthState::None));
        assert_eq!(api.verify_calls(), 1);
    }

    #[tokio::test]
    async fn sign_in_during_bootstrap_is_not_lost() {
        let api = Arc::new(
            slow_api()
                .with_tier("alt@example.com", Tier::Paid)
                .with_tier("vip@example.com", Tier::Premium)
                .with_marker("marker", "alt@example.com"),
        );
        let store = Arc::new(MemoryLocalStore::new());
        store.store_alt_session(alt("alt@example.com"));
        let ctx = context(FakeProvider::default(), api, store);
        let boot = Arc::new(SessionBootstrapper::new(ctx.clone()));
        let listener = AuthEventListener::new(ctx.clone());

        let bootstrap = {
            let boot = boot.clone();
            tokio::spawn(async move { boot.bootstrap().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let outcome = listener
            .on_event(ProviderEvent::SignedIn(live("vip@example.com")))
            .await;

        assert!(matches!(
            bootstrap.await.unwrap(),
            ClientAuthState::CachedAltSession { .. }
        ));
        let expected = ClientAuthState::ProviderSession {
            identity: "vip@example.com".into(),
            tier: Tier::Premium,
        };
        assert_eq!(outcome, ListenerOutcome::Applied(expected.clone()));
        assert_eq!(ctx.state.current(), AuthPhase::Ready(expected));
    }

    #[tokio::test]
    async fn duplicate_sign_in_during_bootstrap_is_a_no_op() {
        let api = Arc::new(slow_api().with_tier("paid@example.com", Tier::Paid));
        let ctx = context(
            FakeProvider { session: Some(live("paid@example.com")) },
            api.clone(),
            Arc::new(MemoryLocalStore::new()),
        );
        let boot = Arc::new(SessionBootstrapper::new(ctx.clone()));
        let listener = AuthEventListener::new(ctx);

        let bootstrap = {
            let boot = boot.clone();
            tokio::spawn(async move { boot.bootstrap().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let outcome = listener
            .on_event(ProviderEvent::SignedIn(live("paid@example.com")))
            .await;

        assert_eq!(bootstrap.await.unwrap().tier(), Tier::Paid);
        assert_eq!(outcome, ListenerOutcome::Ignored);
        assert_eq!(api.verify_calls(), 1);
    }

    #[tokio::test]
    async fn latest_parked_event_wins() {
        let api = Arc::new(
            slow_api()
                .with_tier("first@example.com", Tier::Paid)
                .with_tier("second@example.com", Tier::Paid)
                .with_tier("third@example.com", Tier::Premium),
        );
        let ctx = context(FakeProvider::default(), api.clone(), Arc::new(MemoryLocalStore::new()));
        let listener = Arc::new(AuthEventListener::new(ctx.clone()));

        let spawn_sign_in = |email: &'static str| {
            let listener = listener.clone();
            tokio::spawn(async move {
                listener.on_event(ProviderEvent::SignedIn(live(email))).await
            })
        };

        let in_flight = spawn_sign_in("first@example.com");
        tokio::time::sleep(Duration::from_millis(20)).await;
        let parked = spawn_sign_in("second@example.com");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let superseding = listener
            .on_event(ProviderEvent::SignedIn(live("third@example.com")))
            .await;
        assert_eq!(superseding, ListenerOutcome::Deferred);

        assert!(matches!(in_flight.await.unwrap(), ListenerOutcome::Applied(_)));
        let expected = ClientAuthState::ProviderSession {
            identity: "third@example.com".into(),
            tier: Tier::Premium,
        };
        assert_eq!(parked.await.unwrap(), ListenerOutcome::Applied(expected.clone()));
        assert_eq!(ctx.state.current(), AuthPhase::Ready(expected));
        assert_eq!(api.verify_calls(), 2);
    }

    #[tokio::test]
    async fn sign_out_clears_provider_session() {
        let api = Arc::new(FakeApi::default().with_tier("paid@example.com", Tier::Paid));
        let ctx = context(
            FakeProvider { session: Some(live("paid@example.com")) },
            api,
            Arc::new(MemoryLocalStore::new()),
        );
        SessionBootstrapper::new(ctx.clone()).bootstrap().await;
        let listener = AuthEventListener::new(ctx.clone());

        let other = listener
            .on_event(ProviderEvent::SignedOut { email: Some("someone@example.com".into()) })
            .await;
        assert_eq!(other, ListenerOutcome::Ignored);

        let outcome = listener
            .on_event(ProviderEvent::SignedOut { email: Some("PAID@example.com".into()) })
            .await;
        assert_eq!(outcome, ListenerOutcome::Applied(ClientAuthState::None));
        assert_eq!(ctx.state.current(), AuthPhase::Ready(ClientAuthState::None));
    }

    #[tokio::test]
    async fn sign_out_leaves_alt_session_alone() {
        let api = Arc::new(
            FakeApi::default()
                .with_tier("alt@example.com", Tier::Premium)
                .with_marker("marker", "alt@example.com"),
        );
        let store = Arc::new(MemoryLocalStore::new());
        store.store_alt_session(alt("alt@example.com"));
        let ctx = context(FakeProvider::default(), api, store);
        let state = SessionBootstrapper::new(ctx.clone()).bootstrap().await;
        assert!(matches!(state, ClientAuthState::CachedAltSession { .. }));

        let outcome = AuthEventListener::new(ctx.clone())
            .on_event(ProviderEvent::SignedOut { email: None })
            .await;

        assert_eq!(outcome, ListenerOutcome::Ignored);
        assert_eq!(ctx.state.current(), AuthPhase::Ready(state));
    }
}
