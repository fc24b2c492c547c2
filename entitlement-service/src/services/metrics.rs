use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::{Once, OnceLock};

// Global registry
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

// HTTP metrics
pub static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();

// Entitlement metrics
pub static ENTITLEMENT_RESOLUTIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static SOURCE_ADAPTER_DEGRADED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static OAUTH_STATE_RELAXATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static OAUTH_POLICY_GRANTS_TOTAL: OnceLock<IntCounter> = OnceLock::new();
pub static EXTERNAL_FIELD_VARIANT_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    match IntCounterVec::new(Opts::new(name, help), labels) {
        Ok(metric) => metric,
        Err(e) => {
            tracing::error!("Failed to create {} metric: {}", name, e);
            panic!("Failed to initialize metrics: {}", e);
        }
    }
}

fn register<C>(registry: &Registry, name: &str, collector: &C)
where
    C: prometheus::core::Collector + Clone + 'static,
{
    if let Err(e) = registry.register(Box::new(collector.clone())) {
        tracing::error!("Failed to register {} collector: {}", name, e);
        panic!("Failed to initialize metrics: {}", e);
    }
}

static INIT: Once = Once::new();

/// Build the registry. Safe to call more than once; only the first call wins.
pub fn init_metrics() {
    INIT.call_once(build_metrics);
}

fn build_metrics() {
    let registry = Registry::new();

    let requests_total = counter_vec(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"],
    );

    let request_duration = match HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
        ),
        &["method", "path", "status"],
    ) {
        Ok(metric) => metric,
        Err(e) => {
            tracing::error!(
                "Failed to create http_request_duration_seconds metric: {}",
                e
            );
            panic!("Failed to initialize metrics: {}", e);
        }
    };

    let resolutions = counter_vec(
        "entitlement_resolutions_total",
        "Entitlement resolutions by resulting source and tier",
        &["source", "tier"],
    );
    let degraded = counter_vec(
        "source_adapter_degraded_total",
        "Source adapter calls that degraded to inactive",
        &["adapter"],
    );
    let relaxations = counter_vec(
        "oauth_state_relaxations_total",
        "OAuth exchanges accepted without a matching state",
        &["flow", "client"],
    );
    let policy_grants = match IntCounter::new(
        "oauth_policy_grants_total",
        "Premium grants made by policy without a verified purchase",
    ) {
        Ok(metric) => metric,
        Err(e) => {
            tracing::error!("Failed to create oauth_policy_grants_total metric: {}", e);
            panic!("Failed to initialize metrics: {}", e);
        }
    };
    let field_variants = counter_vec(
        "external_field_variant_total",
        "Which payload field variant satisfied each logical field",
        &["source", "field", "variant"],
    );

    register(&registry, "http_requests_total", &requests_total);
    register(&registry, "http_request_duration_seconds", &request_duration);
    register(&registry, "entitlement_resolutions_total", &resolutions);
    register(&registry, "source_adapter_degraded_total", &degraded);
    register(&registry, "oauth_state_relaxations_total", &relaxations);
    register(&registry, "oauth_policy_grants_total", &policy_grants);
    register(&registry, "external_field_variant_total", &field_variants);

    // Initialize globals
    let _ = REGISTRY.set(registry);
    let _ = HTTP_REQUESTS_TOTAL.set(requests_total);
    let _ = HTTP_REQUEST_DURATION_SECONDS.set(request_duration);
    let _ = ENTITLEMENT_RESOLUTIONS_TOTAL.set(resolutions);
    let _ = SOURCE_ADAPTER_DEGRADED_TOTAL.set(degraded);
    let _ = OAUTH_STATE_RELAXATIONS_TOTAL.set(relaxations);
    let _ = OAUTH_POLICY_GRANTS_TOTAL.set(policy_grants);
    let _ = EXTERNAL_FIELD_VARIANT_TOTAL.set(field_variants);
}

pub fn record_resolution(source: &str, tier: &str) {
    if let Some(counter) = ENTITLEMENT_RESOLUTIONS_TOTAL.get() {
        counter.with_label_values(&[source, tier]).inc();
    }
}

pub fn record_degraded(adapter: &str) {
    if let Some(counter) = SOURCE_ADAPTER_DEGRADED_TOTAL.get() {
        counter.with_label_values(&[adapter]).inc();
    }
}

pub fn record_state_relaxation(flow: &str, client: &str) {
    if let Some(counter) = OAUTH_STATE_RELAXATIONS_TOTAL.get() {
        counter.with_label_values(&[flow, client]).inc();
    }
}

pub fn record_policy_grant() {
    if let Some(counter) = OAUTH_POLICY_GRANTS_TOTAL.get() {
        counter.inc();
    }
}

pub fn record_field_variant(source: &str, field: &str, variant: &str) {
    if let Some(counter) = EXTERNAL_FIELD_VARIANT_TOTAL.get() {
        counter.with_label_values(&[source, field, variant]).inc();
    }
}

pub fn get_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match REGISTRY.get() {
        Some(r) => r,
        None => {
            tracing::error!("Metrics registry not initialized");
            return "# Metrics registry not initialized\n".to_string();
        }
    };

    let metric_families = registry.gather();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to convert metrics to UTF-8: {}", e);
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        }
    }
}
