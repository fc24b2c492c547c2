use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, runtime, trace as sdktrace};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Crates whose debug output drowns out service events.
const QUIET_DEPENDENCIES: &[&str] = &["sqlx=warn", "hyper=warn", "reqwest=warn", "h2=warn"];

/// Flushes buffered spans when dropped. Hold it for the life of `main`.
#[must_use = "dropping the guard immediately stops span export"]
pub struct TelemetryGuard {
    exporting: bool,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.exporting {
            opentelemetry::global::shutdown_tracer_provider();
        }
    }
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut directives = vec![log_level.to_string()];
        directives.extend(QUIET_DEPENDENCIES.iter().map(|d| d.to_string()));
        EnvFilter::new(directives.join(","))
    })
}

/// Install the global subscriber: env filter, flattened JSON events, and an
/// OTLP span exporter when `otlp_endpoint` is set.
pub fn init_tracing(
    service_name: &str,
    service_version: &str,
    log_level: &str,
    otlp_endpoint: Option<&str>,
) -> TelemetryGuard {
    let tracer = otlp_endpoint.and_then(|endpoint| {
        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint);

        let resource = Resource::new(vec![
            KeyValue::new("service.name", service_name.to_string()),
            KeyValue::new("service.version", service_version.to_string()),
        ]);

        match opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(sdktrace::config().with_resource(resource))
            .install_batch(runtime::Tokio)
        {
            Ok(t) => Some(t),
            Err(e) => {
                // No subscriber yet, so stderr is the only sink.
                eprintln!("OTLP exporter for {service_name} at {endpoint} unavailable: {e}");
                None
            }
        }
    });

    let exporting = tracer.is_some();
    let telemetry = tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t));

    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(telemetry)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .json()
                .flatten_event(true),
        )
        .init();

    TelemetryGuard { exporting }
}
