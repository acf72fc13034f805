//! Startup wiring of the process-wide governance services.

use std::sync::Arc;

use phi_query_core::config::AppConfig;
use phi_query_core::{Error, Result};

use crate::access::{AccessPolicy, PhiFieldRegistry};
use crate::audit::{AuditSink, AuditTrail, FanoutAuditSink, JsonlAuditSink, TracingAuditSink};
use crate::crypto::EncryptionService;
use crate::rate_limit::QueryRateLimiter;
use crate::validator::QueryValidator;

/// Read-only-after-init governance services, constructed once and handed to
/// the governor by reference.
#[derive(Clone)]
pub struct GovernanceServices {
    /// Absent only when encryption is disabled in configuration.
    pub encryption: Option<Arc<EncryptionService>>,
    pub registry: Arc<PhiFieldRegistry>,
    pub access: AccessPolicy,
    pub audit: AuditTrail,
    pub validator: QueryValidator,
    pub rate_limiter: Arc<QueryRateLimiter>,
}

impl GovernanceServices {
    /// Validate the configuration and build every service.
    ///
    /// Any failure is a `Configuration` error and nothing partially built is returned.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;

        let encryption = if config.security.enable_encryption {
            let key = config.encryption_key().unwrap_or_default();
            Some(Arc::new(EncryptionService::new(key)?))
        } else {
            tracing::warn!("Encryption disabled; deployment is not HIPAA compliant");
            None
        };

        let registry = Arc::new(PhiFieldRegistry::new(config.compliance.phi_fields.iter().cloned()));
        let access = AccessPolicy::new(registry.clone());

        let audit = AuditTrail::new(Self::audit_sink(config)?)
            .with_enabled(config.compliance.enable_audit_trail);
        if !audit.is_enabled() {
            tracing::warn!("Audit trail disabled; deployment is not HIPAA compliant");
        }

        let rate_limiter = Arc::new(QueryRateLimiter::new(
            config.rate_limit.max_queries_per_minute,
            config.rate_limit.max_queries_per_hour,
        )?);

        tracing::info!(
            phi_fields = registry.len(),
            encryption = encryption.is_some(),
            audit = audit.is_enabled(),
            "Governance services initialized"
        );

        Ok(Self {
            encryption,
            registry,
            access,
            audit,
            validator: QueryValidator::new(),
            rate_limiter,
        })
    }

    fn audit_sink(config: &AppConfig) -> Result<Arc<dyn AuditSink>> {
        let tracing_sink: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
        match &config.compliance.audit_log_path {
            Some(path) if !path.trim().is_empty() => {
                // The file sink goes first so audit queries are answered from it.
                let file_sink = JsonlAuditSink::open(path)
                    .map_err(|e| Error::configuration(format!("Audit log unavailable: {}", e)))?;
                let file_sink: Arc<dyn AuditSink> = Arc::new(file_sink);
                Ok(Arc::new(FanoutAuditSink::new(vec![file_sink, tracing_sink])))
            }
            _ => Ok(tracing_sink),
        }
    }
}
