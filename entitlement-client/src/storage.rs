//! Device-local persistence: the cached alternate-login credential and the
//! recovery hint. Both are small typed records, never free-form keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::models::{normalize_email, Verification};
use crate::recovery::RecoveryHint;

/// Credential from an alternate login (e.g. the marketplace OAuth flow).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAltSession {
    pub email: String,
    /// Session token from `/verify`. Bootstrap only trusts the credential
    /// while the service still reports this token live for `email`.
    pub session_marker: String,
    pub cached_at: DateTime<Utc>,
}

impl CachedAltSession {
    /// Credential for a verified answer; `None` unless a token was issued.
    pub fn from_verification(email: &str, verification: &Verification) -> Option<Self> {
        verification.entitled_tier()?;
        let token = verification.session_token.clone()?;
        Some(Self {
            email: normalize_email(email),
            session_marker: token,
            cached_at: Utc::now(),
        })
    }
}

pub trait LocalStore: Send + Sync {
    fn cached_alt_session(&self) -> Option<CachedAltSession>;
    fn store_alt_session(&self, session: CachedAltSession);
    fn clear_alt_session(&self);

    fn recovery_hint(&self) -> Option<RecoveryHint>;
    fn store_recovery_hint(&self, hint: RecoveryHint);
    fn clear_recovery_hint(&self);
}

#[derive(Debug, Default)]
struct Slots {
    alt_session: Option<CachedAltSession>,
    recovery_hint: Option<RecoveryHint>,
}

/// Process-local store for tests and headless clients.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    slots: Mutex<Slots>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Slots) -> R) -> R {
        let mut slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut slots)
    }
}

impl LocalStore for MemoryLocalStore {
    fn cached_alt_session(&self) -> Option<CachedAltSession> {
        self.with(|s| s.alt_session.clone())
    }

    fn store_alt_session(&self, session: CachedAltSession) {
        self.with(|s| s.alt_session = Some(session));
    }

    fn clear_alt_session(&self) {
        self.with(|s| s.alt_session = None);
    }

    fn recovery_hint(&self) -> Option<RecoveryHint> {
        self.with(|s| s.recovery_hint.clone())
    }

    fn store_recovery_hint(&self, hint: RecoveryHint) {
        self.with(|s| s.recovery_hint = Some(hint));
    }

    fn clear_recovery_hint(&self) {
        self.with(|s| s.recovery_hint = None);
    }
}
