//! Client side of entitlement resolution.
//!
//! Establishes who the current user is at startup ([`SessionBootstrapper`])
//! and keeps that answer current as the identity provider signs users in and
//! out ([`AuthEventListener`]). Consumers watch an [`AuthPhase`] that only
//! ever moves between `Loading` and one terminal [`ClientAuthState`].

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod context;
pub mod error;
pub mod listener;
pub mod models;
pub mod provider;
pub mod recovery;
pub mod state;
pub mod storage;

pub use api::{EntitlementApi, HttpEntitlementApi};
pub use bootstrap::SessionBootstrapper;
pub use config::ClientConfig;
pub use context::AuthContext;
pub use error::ClientError;
pub use listener::{AuthEventListener, ListenerOutcome};
pub use models::{IdentitySnapshot, SessionIntrospection, Tier, Verification};
pub use provider::{IdentityProvider, ProviderEvent, ProviderSession};
pub use recovery::RecoveryHint;
pub use state::{AuthPhase, AuthStateHandle, ClientAuthState};
pub use storage::{CachedAltSession, LocalStore, MemoryLocalStore};
