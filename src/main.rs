//! phi-query - governed natural-language access to a PHI warehouse.
//!
//! Startup only: loads configuration, initializes tracing and metrics,
//! builds the governance services and prints the compliance report.

use phi_query_core::config::AppConfig;
use phi_query_governance::{run_doctor, GovernanceServices};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration errors abort before anything else is initialized.
    let config = AppConfig::load_validated()?;

    phi_query_governance::configure_tracing(&config.logging)?;
    tracing::info!(
        environment = %config.environment,
        dataset = %config.warehouse.dataset_id,
        "Starting phi-query v{}",
        env!("CARGO_PKG_VERSION")
    );

    let _metrics = phi_query_governance::setup_metrics_recorder()?;

    let services = GovernanceServices::from_config(&config)?;

    let report = run_doctor(&services, &config, None).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.is_healthy() {
        tracing::info!("Compliance checks passed");
    } else {
        let failed: Vec<&str> = report
            .checks
            .iter()
            .filter(|c| c.status == "fail")
            .map(|c| c.name.as_str())
            .collect();
        tracing::warn!(failed = ?failed, "Compliance checks degraded");
        if config.is_production() {
            anyhow::bail!("refusing to start in production with failing compliance checks");
        }
    }

    Ok(())
}
