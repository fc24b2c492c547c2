pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use service_core::axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    rate_limit::{create_identity_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;

use crate::config::EntitlementConfig;
use crate::services::{
    MarketplaceAdapter, NewsletterAdapter, OAuthExchangeService, ResolverSettings, Stores,
    TierResolver, WebhookService,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::verify::verify,
        handlers::oauth::authorize,
        handlers::oauth::exchange,
        handlers::webhook::marketplace_webhook,
        handlers::identity::introspect,
        handlers::identity::get_identity,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::verify::VerifyRequest,
            dtos::verify::VerifyResponse,
            dtos::oauth::ExchangeRequestBody,
            dtos::oauth::ExchangeResponse,
            dtos::oauth::ExchangeUser,
            dtos::oauth::ExchangeErrorResponse,
            dtos::identity::IntrospectRequest,
            dtos::identity::IntrospectResponse,
            dtos::identity::IdentityLookupResponse,
            models::Tier,
            models::EntitlementSource,
            services::oauth::FlowType,
            services::oauth::TierBasis,
            services::oauth::SubscriptionDetail,
        )
    ),
    tags(
        (name = "Entitlement", description = "Tier resolution across subscription platforms"),
        (name = "OAuth", description = "Marketplace sign-in"),
        (name = "Webhooks", description = "Marketplace membership events"),
        (name = "Session", description = "Session and identity lookups"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: EntitlementConfig,
    pub stores: Stores,
    pub resolver: TierResolver,
    pub oauth: OAuthExchangeService,
    pub webhooks: WebhookService,
    pub ip_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Wire the adapters, resolver and handlers' services over `stores`.
    pub fn new(config: EntitlementConfig, stores: Stores) -> Result<Self, AppError> {
        let adapter_timeout = Duration::from_millis(config.resolver.adapter_timeout_ms);

        let newsletter = NewsletterAdapter::new(config.newsletter.clone(), adapter_timeout)
            .map_err(AppError::ConfigError)?;
        let marketplace = MarketplaceAdapter::new(
            stores.purchases.clone(),
            config.marketplace.placeholder_references.clone(),
        );

        let resolver = TierResolver::new(
            Arc::new(newsletter),
            Arc::new(marketplace),
            stores.clone(),
            create_identity_rate_limiter(
                config.rate_limit.verify_attempts,
                config.rate_limit.verify_window_seconds,
            ),
            ResolverSettings {
                adapter_timeout,
                resolution_timeout: Duration::from_millis(config.resolver.resolution_timeout_ms),
                session_ttl: chrono::Duration::hours(config.session.ttl_hours),
            },
        );

        let oauth = OAuthExchangeService::new(config.oauth.clone(), stores.clone())
            .map_err(AppError::ConfigError)?;
        let webhooks = WebhookService::new(
            config.marketplace.webhook_secret.clone(),
            config.oauth.product_ids.clone(),
            stores.clone(),
        );

        let ip_rate_limiter = service_core::middleware::rate_limit::create_ip_rate_limiter(
            config.rate_limit.global_ip_limit,
            config.rate_limit.global_ip_window_seconds,
        );

        Ok(Self {
            config,
            stores,
            resolver,
            oauth,
            webhooks,
            ip_rate_limiter,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let ip_limiter = state.ip_rate_limiter.clone();

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .route("/verify", post(handlers::verify::verify))
        .route("/oauth/authorize", get(handlers::oauth::authorize))
        .route("/oauth/exchange", post(handlers::oauth::exchange))
        .route(
            "/webhooks/marketplace",
            post(handlers::webhook::marketplace_webhook),
        )
        .route("/session/introspect", post(handlers::identity::introspect))
        .route("/identities/:email", get(handlers::identity::get_identity))
        .with_state(state.clone())
        // Global IP rate limiting
        .layer(from_fn_with_state(ip_limiter, ip_rate_limit_middleware))
        .layer(from_fn(middleware::metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config.security.allowed_origins))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        // Credentialed CORS cannot use a wildcard origin.
        .filter(|o| {
            if o.as_str() == "*" {
                tracing::warn!("Ignoring wildcard CORS origin");
            }
            o.as_str() != "*"
        })
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-request-id"),
        ])
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 500, description = "Identity store is unreachable")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.stores.identities.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Identity store health check failed");
        AppError::DatabaseError(e)
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "identity_store": "up",
            "newsletter": configured(state.config.newsletter.is_configured()),
            "marketplace_oauth": configured(state.oauth.is_configured()),
        }
    })))
}

fn configured(is_configured: bool) -> &'static str {
    if is_configured {
        "configured"
    } else {
        "unconfigured"
    }
}
