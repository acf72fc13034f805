//! Compliance self-check run at startup.

use serde::Serialize;
use std::time::Instant;

use phi_query_core::config::AppConfig;
use phi_query_core::traits::Warehouse;

use crate::audit::{AuditAction, AuditEvent, AuditOutcome};
use crate::crypto::KeySource;
use crate::services::GovernanceServices;

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub checks: Vec<CheckResult>,
    pub overall_status: String,
}

impl DoctorReport {
    pub fn is_healthy(&self) -> bool {
        self.overall_status == "healthy"
    }
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub category: String,
    pub name: String,
    pub status: String, // "pass", "fail", "warn"
    pub message: Option<String>,
    pub latency_ms: Option<u64>,
}

impl CheckResult {
    fn pass(category: &str, name: &str, latency: Option<u64>) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            status: "pass".to_string(),
            message: None,
            latency_ms: latency,
        }
    }

    fn warn(category: &str, name: &str, message: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            status: "warn".to_string(),
            message: Some(message),
            latency_ms: None,
        }
    }

    fn fail(category: &str, name: &str, message: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            status: "fail".to_string(),
            message: Some(message),
            latency_ms: None,
        }
    }
}

/// Check the governance services against the configuration. The warehouse
/// is pinged when one is supplied.
pub async fn run_doctor(
    services: &GovernanceServices,
    config: &AppConfig,
    warehouse: Option<&dyn Warehouse>,
) -> DoctorReport {
    let mut checks = Vec::new();

    // 1. HIPAA configuration flags
    if config.is_hipaa_compliant() {
        checks.push(CheckResult::pass("Compliance", "HIPAA configuration", None));
    } else {
        checks.push(CheckResult::fail(
            "Compliance",
            "HIPAA configuration",
            format!(
                "enable_encryption={}, enable_audit_trail={}",
                config.security.enable_encryption, config.compliance.enable_audit_trail
            ),
        ));
    }

    // 2. Encryption round-trip
    match &services.encryption {
        Some(encryption) => {
            let start = Instant::now();
            let sample = "doctor_check";
            let roundtrip = encryption
                .encrypt(sample)
                .and_then(|token| encryption.decrypt(&token));
            let latency = start.elapsed().as_millis() as u64;
            match roundtrip {
                Ok(value) if value == sample => {
                    if encryption.key_source() == KeySource::Derived {
                        checks.push(CheckResult::warn(
                            "Security",
                            "Encryption",
                            "Key derived from a passphrase; configure 32 bytes of key material".to_string(),
                        ));
                    } else {
                        checks.push(CheckResult::pass("Security", "Encryption", Some(latency)));
                    }
                }
                Ok(_) => checks.push(CheckResult::fail("Security", "Encryption", "Value mismatch".to_string())),
                Err(e) => checks.push(CheckResult::fail("Security", "Encryption", e.to_string())),
            }
        }
        None => checks.push(CheckResult::fail(
            "Security",
            "Encryption",
            "Encryption disabled".to_string(),
        )),
    }

    // 3. PHI registry
    if services.registry.is_empty() {
        checks.push(CheckResult::fail("Compliance", "PHI field registry", "No PHI fields configured".to_string()));
    } else {
        checks.push(CheckResult::pass("Compliance", "PHI field registry", None));
    }

    // 4. Audit sink
    if services.audit.is_enabled() {
        let start = Instant::now();
        let event = AuditEvent::new(
            "system",
            AuditAction::Custom("DOCTOR_CHECK".to_string()),
            "audit_trail",
            AuditOutcome::Success,
        )
        .with_metadata("retention_days", config.compliance.data_retention_days);
        match services.audit.record_checked(event).await {
            Ok(()) => {
                let latency = start.elapsed().as_millis() as u64;
                checks.push(CheckResult::pass("Audit", "Audit sink", Some(latency)));
            }
            Err(e) => checks.push(CheckResult::fail("Audit", "Audit sink", e.to_string())),
        }
    } else {
        checks.push(CheckResult::fail("Audit", "Audit sink", "Audit trail disabled".to_string()));
    }

    // 5. Rate limits
    checks.push(CheckResult {
        category: "Governance".to_string(),
        name: "Rate limits".to_string(),
        status: "pass".to_string(),
        message: Some(format!(
            "{}/minute, {}/hour per user",
            config.rate_limit.max_queries_per_minute, config.rate_limit.max_queries_per_hour
        )),
        latency_ms: None,
    });

    // 6. Warehouse connectivity
    if let Some(warehouse) = warehouse {
        let start = Instant::now();
        match warehouse.health_check().await {
            Ok(()) => {
                let latency = start.elapsed().as_millis() as u64;
                checks.push(CheckResult::pass("Infrastructure", "Warehouse", Some(latency)));
            }
            Err(e) => checks.push(CheckResult::fail("Infrastructure", "Warehouse", e.to_string())),
        }
    }

    let overall_status = if checks.iter().any(|c| c.status == "fail") {
        "degraded".to_string()
    } else {
        "healthy".to_string()
    };

    DoctorReport {
        checks,
        overall_status,
    }
}
