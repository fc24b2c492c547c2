use entitlement_service::{
    build_router,
    config::EntitlementConfig,
    services::{MemoryStore, PgStore, Stores},
    AppState,
};
use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = EntitlementConfig::from_env()?;

    let _telemetry = init_tracing(
        &config.service_name,
        &config.service_version,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    entitlement_service::services::metrics::init_metrics();

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting entitlement service"
    );

    let stores = if config.database.url.is_some() {
        tracing::info!("Connecting to PostgreSQL");
        let store = PgStore::connect(&config.database)
            .await
            .map_err(AppError::DatabaseError)?;
        store
            .run_migrations()
            .await
            .map_err(AppError::DatabaseError)?;
        tracing::info!("Database initialized successfully");
        Stores::postgres(store)
    } else {
        tracing::warn!("DATABASE_URL not set, using the in-memory store");
        Stores::in_memory(Arc::new(MemoryStore::new()))
    };

    let state = AppState::new(config.clone(), stores)?;
    tracing::info!(
        newsletter_configured = config.newsletter.is_configured(),
        oauth_configured = state.oauth.is_configured(),
        state_relaxations = !config.oauth.state_relaxations.is_empty(),
        "Services initialized"
    );

    let app = build_router(state);

    let addr = config.common.socket_addr();

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
