use config::{Config, ConfigError, Environment, File};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

use crate::error::{Error, Result};

const VALID_ENVIRONMENTS: [&str; 3] = ["development", "staging", "production"];
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Upper bound on rows shown in one rendered response.
pub const MAX_DISPLAY_ROWS: usize = 10;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub environment: String,
    pub warehouse: WarehouseConfig,
    pub model: ModelConfig,
    pub security: SecurityConfig,
    pub compliance: ComplianceConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
    pub governor: GovernorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WarehouseConfig {
    pub project_id: String,
    pub dataset_id: String,
    pub location: String,
    pub timeout_secs: u64,
    pub max_results: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub name: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    pub enable_encryption: bool,
    pub encryption_key: Option<Secret<String>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ComplianceConfig {
    pub phi_fields: Vec<String>,
    /// Retention is enforced by the external audit sink; carried here for it.
    pub data_retention_days: u32,
    pub enable_audit_trail: bool,
    /// Append-only JSON-lines audit file. Unset means tracing output only.
    pub audit_log_path: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub max_queries_per_minute: u32,
    pub max_queries_per_hour: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GovernorConfig {
    /// Rows included in the rendered response.
    pub display_rows: usize,
    /// Ask the model for a natural-language summary of the result set.
    pub summarize_results: bool,
    /// Extra attempts per model call after the first failure.
    pub llm_retries: u32,
    /// Characters of the inbound text kept in the STARTED audit event.
    pub input_preview_chars: usize,
}

impl AppConfig {
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("PHI_QUERY_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map APP__WAREHOUSE__DATASET_ID=clinical to warehouse.dataset_id
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Load and validate, folding every failure into `Error::Configuration`.
    pub fn load_validated() -> Result<Self> {
        let config = Self::load().map_err(|e| Error::configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no request may run under.
    pub fn validate(&self) -> Result<()> {
        if !VALID_ENVIRONMENTS.contains(&self.environment.to_lowercase().as_str()) {
            return Err(Error::configuration(format!(
                "Environment must be one of {:?}, got '{}'",
                VALID_ENVIRONMENTS, self.environment
            )));
        }
        if !VALID_LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::configuration(format!(
                "Log level must be one of {:?}, got '{}'",
                VALID_LOG_LEVELS, self.logging.level
            )));
        }
        if self.security.enable_encryption && self.encryption_key().is_none() {
            return Err(Error::configuration("Encryption key must be provided"));
        }
        if self.warehouse.dataset_id.trim().is_empty() {
            return Err(Error::configuration("warehouse.dataset_id must be set"));
        }
        if self.compliance.phi_fields.iter().all(|f| f.trim().is_empty()) {
            return Err(Error::configuration("compliance.phi_fields must not be empty"));
        }
        if self.warehouse.timeout_secs == 0 || self.warehouse.max_results == 0 {
            return Err(Error::configuration(
                "warehouse.timeout_secs and warehouse.max_results must be positive",
            ));
        }
        if self.rate_limit.max_queries_per_minute == 0 || self.rate_limit.max_queries_per_hour == 0 {
            return Err(Error::configuration("rate limits must be positive"));
        }
        if self.governor.display_rows == 0 || self.governor.display_rows > MAX_DISPLAY_ROWS {
            return Err(Error::configuration(format!(
                "governor.display_rows must be between 1 and {}, got {}",
                MAX_DISPLAY_ROWS, self.governor.display_rows
            )));
        }
        Ok(())
    }

    /// The configured encryption secret, if present and non-empty.
    pub fn encryption_key(&self) -> Option<&str> {
        self.security
            .encryption_key
            .as_ref()
            .map(|k| k.expose_secret().as_str())
            .filter(|k| !k.is_empty())
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Encryption and the audit trail are both switched on.
    pub fn is_hipaa_compliant(&self) -> bool {
        self.security.enable_encryption && self.compliance.enable_audit_trail
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "development".into(),
            warehouse: WarehouseConfig {
                project_id: "local-project".into(),
                dataset_id: "clinical".into(),
                location: "US".into(),
                timeout_secs: 300,
                max_results: 1000,
            },
            model: ModelConfig {
                name: "gemini-pro".into(),
                temperature: 0.0,
                max_tokens: 2000,
            },
            security: SecurityConfig {
                enable_encryption: true,
                encryption_key: None,
            },
            compliance: ComplianceConfig {
                phi_fields: vec![
                    "patient_id".into(),
                    "ssn".into(),
                    "medical_record_number".into(),
                    "name".into(),
                    "dob".into(),
                ],
                data_retention_days: 2555, // 7 years
                enable_audit_trail: true,
                audit_log_path: None,
            },
            rate_limit: RateLimitConfig {
                max_queries_per_minute: 10,
                max_queries_per_hour: 100,
            },
            logging: LoggingConfig {
                level: "info".into(),
                json: false,
            },
            governor: GovernorConfig {
                display_rows: 10,
                summarize_results: true,
                llm_retries: 0,
                input_preview_chars: 100,
            },
        }
    }
}
