use tokio::sync::{watch, Mutex, MutexGuard, TryLockError};

use crate::models::Tier;

/// How the client currently believes the user is authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAuthState {
    None,
    ProviderSession { identity: String, tier: Tier },
    CachedAltSession { identity: String, tier: Tier },
    /// A premium identity was seen on this device but no credential is live.
    NeedsRestoration { identity: String },
}

impl ClientAuthState {
    pub fn identity(&self) -> Option<&str> {
        match self {
            ClientAuthState::None => None,
            ClientAuthState::ProviderSession { identity, .. }
            | ClientAuthState::CachedAltSession { identity, .. }
            | ClientAuthState::NeedsRestoration { identity } => Some(identity),
        }
    }

    /// Tier the UI may grant. Restoration placeholders grant nothing.
    pub fn tier(&self) -> Tier {
        match self {
            ClientAuthState::ProviderSession { tier, .. }
            | ClientAuthState::CachedAltSession { tier, .. } => *tier,
            ClientAuthState::None | ClientAuthState::NeedsRestoration { .. } => Tier::Free,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthPhase {
    Loading,
    Ready(ClientAuthState),
}

/// Publishes the auth phase to any number of watchers. Every transition
/// happens under `transition`, so watchers see `Loading` followed by one
/// terminal state and never an intermediate guess.
#[derive(Debug)]
pub struct AuthStateHandle {
    tx: watch::Sender<AuthPhase>,
    transition: Mutex<()>,
}

impl Default for AuthStateHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthStateHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AuthPhase::Loading);
        Self {
            tx,
            transition: Mutex::new(()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthPhase> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> AuthPhase {
        self.tx.borrow().clone()
    }

    pub(crate) async fn begin(&self) -> MutexGuard<'_, ()> {
        self.transition.lock().await
    }

    pub(crate) fn try_begin(&self) -> Result<MutexGuard<'_, ()>, TryLockError> {
        self.transition.try_lock()
    }

    /// Callers must hold the guard from `begin`/`try_begin`.
    pub(crate) fn publish(&self, _guard: &MutexGuard<'_, ()>, phase: AuthPhase) {
        self.tx.send_replace(phase);
    }
}
