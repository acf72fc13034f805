//! Logging and distributed tracing configuration.

use phi_query_core::config::LoggingConfig;
use phi_query_core::{Error, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Configure stdout logging (plain or JSON) and, when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set, OpenTelemetry export.
///
/// `RUST_LOG` overrides the configured level.
pub fn configure_tracing(logging: &LoggingConfig) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| logging.level.to_lowercase()),
    );

    let fmt_layer = if logging.json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        let otel_layer = tracing_opentelemetry::layer().with_tracer(otlp_tracer(&endpoint)?);

        registry
            .with(otel_layer)
            .try_init()
            .map_err(|e| Error::internal(format!("Failed to install tracing subscriber: {}", e)))?;
        tracing::info!(endpoint = %endpoint, "OpenTelemetry tracing initialized");
    } else {
        registry
            .try_init()
            .map_err(|e| Error::internal(format!("Failed to install tracing subscriber: {}", e)))?;
    }

    Ok(())
}

/// Install a batching OTLP exporter as the global provider and return its tracer.
fn otlp_tracer(endpoint: &str) -> Result<sdktrace::Tracer> {
    let provider = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint.to_string()),
        )
        .with_trace_config(
            sdktrace::config().with_resource(Resource::new(vec![KeyValue::new(
                "service.name",
                "phi-query",
            )])),
        )
        .install_batch(runtime::Tokio)
        .map_err(|e| Error::internal(format!("Failed to install OTLP pipeline: {}", e)))?;

    let tracer = provider.tracer("phi-query");
    opentelemetry::global::set_tracer_provider(provider);
    Ok(tracer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_otlp_tracer_feeds_tracing_layer() {
        let tracer = otlp_tracer("http://localhost:4317").unwrap();
        let layer = tracing_opentelemetry::layer().with_tracer(tracer);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("otlp_smoke");
            let _entered = span.enter();
            tracing::info!("inside exported span");
        });
    }
}
