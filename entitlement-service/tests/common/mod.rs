#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use entitlement_service::{
    build_router,
    config::{
        DatabaseConfig, EntitlementConfig, Environment, MarketplaceConfig, NewsletterConfig,
        OAuthConfig, RateLimitConfig, ResolverConfig, SecurityConfig, SessionConfig,
    },
    services::{MemoryStore, Stores},
    AppState,
};
use http_body_util::BodyExt;
use secrecy::SecretString;
use std::sync::Arc;
use tower::util::ServiceExt;

pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const PRODUCT_ID: &str = "prod_ours";

/// Config pointing both platforms at `platform_url` (usually a wiremock server).
pub fn test_config(platform_url: &str) -> EntitlementConfig {
    EntitlementConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "entitlement-service-test".to_string(),
        service_version: "0.0.0".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: None,
            max_connections: 1,
        },
        newsletter: NewsletterConfig {
            base_url: platform_url.to_string(),
            api_key: SecretString::new("newsletter-key".to_string()),
            publication_id: "pub_1".to_string(),
            premium_labels: vec!["premium".to_string()],
            paid_labels: vec!["paid".to_string()],
        },
        marketplace: MarketplaceConfig {
            webhook_secret: SecretString::new(WEBHOOK_SECRET.to_string()),
            placeholder_references: ["", "none", "no_purchase", "n/a", "manual", "free"]
                .into_iter()
                .map(String::from)
                .collect(),
        },
        oauth: OAuthConfig {
            client_id: "client_1".to_string(),
            client_secret: SecretString::new("client-secret".to_string()),
            redirect_uri: "http://localhost:3000/oauth/callback".to_string(),
            authorize_url: format!("{}/oauth/authorize", platform_url),
            token_url: format!("{}/oauth/token", platform_url),
            api_base_url: format!("{}/api/v5", platform_url),
            product_ids: vec![PRODUCT_ID.to_string()],
            assume_premium_on_oauth_success: true,
            timeout_secs: 5,
            state_relaxations: "redirect:ios_safari".parse().unwrap(),
        },
        session: SessionConfig { ttl_hours: 24 },
        resolver: ResolverConfig {
            adapter_timeout_ms: 1_000,
            resolution_timeout_ms: 3_000,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        rate_limit: RateLimitConfig {
            verify_attempts: 100,
            verify_window_seconds: 60,
            global_ip_limit: 1_000,
            global_ip_window_seconds: 60,
        },
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub state: AppState,
}

impl TestApp {
    pub fn new(config: EntitlementConfig) -> Self {
        entitlement_service::services::metrics::init_metrics();
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(config, Stores::in_memory(store.clone()))
            .expect("Failed to build app state");
        let router = build_router(state.clone());
        Self {
            router,
            store,
            state,
        }
    }

    pub async fn post_json(
        &self,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }
}
