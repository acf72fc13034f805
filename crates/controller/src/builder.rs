//! Builder for Governor.

use std::sync::Arc;

use phi_query_core::config::AppConfig;
use phi_query_core::traits::{LlmClient, Warehouse};
use phi_query_core::{Error, Result};
use phi_query_governance::{
    AccessPolicy, AuditTrail, GovernanceServices, QueryRateLimiter, QueryValidator,
};

use crate::governor::{Governor, GovernorSettings};
use crate::render::{ResultRenderer, TextRenderer};

/// Builder for constructing a Governor.
pub struct GovernorBuilder {
    settings: GovernorSettings,
    llm: Option<Arc<dyn LlmClient>>,
    warehouse: Option<Arc<dyn Warehouse>>,
    access: Option<AccessPolicy>,
    audit: Option<AuditTrail>,
    validator: QueryValidator,
    rate_limiter: Option<Arc<QueryRateLimiter>>,
    renderer: Arc<dyn ResultRenderer>,
}

impl GovernorBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            settings: GovernorSettings::default(),
            llm: None,
            warehouse: None,
            access: None,
            audit: None,
            validator: QueryValidator::new(),
            rate_limiter: None,
            renderer: Arc::new(TextRenderer),
        }
    }

    /// Settings from configuration plus every governance service.
    pub fn from_config(config: &AppConfig, services: &GovernanceServices) -> Self {
        Self::new()
            .with_settings(GovernorSettings::from_app_config(config))
            .with_services(services)
    }

    /// Set the settings.
    pub fn with_settings(mut self, settings: GovernorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the LLM client.
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Set the warehouse client.
    pub fn with_warehouse(mut self, warehouse: Arc<dyn Warehouse>) -> Self {
        self.warehouse = Some(warehouse);
        self
    }

    /// Take access policy, audit trail, validator and rate limiter from `services`.
    pub fn with_services(mut self, services: &GovernanceServices) -> Self {
        self.access = Some(services.access.clone());
        self.audit = Some(services.audit.clone());
        self.validator = services.validator.clone();
        self.rate_limiter = Some(services.rate_limiter.clone());
        self
    }

    /// Set the access policy.
    pub fn with_access_policy(mut self, access: AccessPolicy) -> Self {
        self.access = Some(access);
        self
    }

    /// Set the audit trail.
    pub fn with_audit(mut self, audit: AuditTrail) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Set the statement validator.
    pub fn with_validator(mut self, validator: QueryValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Set the per-user rate limiter.
    pub fn with_rate_limiter(mut self, limiter: Arc<QueryRateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Remove the rate limiter.
    pub fn without_rate_limiter(mut self) -> Self {
        self.rate_limiter = None;
        self
    }

    /// Set the result renderer.
    pub fn with_renderer(mut self, renderer: Arc<dyn ResultRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Build the Governor. Collaborators and governance services are required.
    pub fn build(self) -> Result<Governor> {
        Ok(Governor {
            settings: self.settings,
            llm: self
                .llm
                .ok_or_else(|| Error::configuration("LLM client not configured"))?,
            warehouse: self
                .warehouse
                .ok_or_else(|| Error::configuration("Warehouse client not configured"))?,
            access: self
                .access
                .ok_or_else(|| Error::configuration("Access policy not configured"))?,
            audit: self
                .audit
                .ok_or_else(|| Error::configuration("Audit trail not configured"))?,
            validator: self.validator,
            rate_limiter: self.rate_limiter,
            renderer: self.renderer,
        })
    }
}

impl Default for GovernorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
