//! Metrics implementation using Prometheus.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use phi_query_core::{Error, Result};

/// Initialize Prometheus recorder and return the handle.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    let builder = PrometheusBuilder::new();

    let handle = builder
        .install_recorder()
        .map_err(|e| Error::internal(format!("Failed to install Prometheus recorder: {}", e)))?;

    tracing::info!("Prometheus metrics recorder initialized");
    Ok(handle)
}

/// Track one governed query by its final outcome (`success`, `denied`, `error`).
pub fn track_query(outcome: &'static str, latency_sec: f64) {
    metrics::counter!("phi_queries_total", "outcome" => outcome).increment(1);
    metrics::histogram!("phi_query_duration_seconds", "outcome" => outcome).record(latency_sec);
}

/// Track result sets that carried PHI columns.
pub fn track_phi_result(field_count: usize) {
    metrics::counter!("phi_results_total").increment(1);
    metrics::histogram!("phi_fields_per_result").record(field_count as f64);
}

/// Helper to track token usage.
pub fn track_tokens(prompt: u64, completion: u64) {
    metrics::counter!("llm_token_usage_total", "type" => "prompt").increment(prompt);
    metrics::counter!("llm_token_usage_total", "type" => "completion").increment(completion);
}
