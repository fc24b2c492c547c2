//! HTTP handlers for entitlement-service.

pub mod identity;
pub mod metrics;
pub mod oauth;
pub mod verify;
pub mod webhook;
