use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

// =============================================================================
// Roles
// =============================================================================

/// Role of the person or service issuing a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    HealthcareProvider,
    Analyst,
    Readonly,
}

impl Role {
    /// All known roles.
    pub const ALL: [Role; 4] = [
        Role::Admin,
        Role::HealthcareProvider,
        Role::Analyst,
        Role::Readonly,
    ];

    /// Static role policy: whether this role may receive PHI-bearing columns.
    pub fn can_access_phi(&self) -> bool {
        matches!(self, Role::Admin | Role::HealthcareProvider)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::HealthcareProvider => "healthcare_provider",
            Role::Analyst => "analyst",
            Role::Readonly => "readonly",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "healthcare_provider" => Ok(Role::HealthcareProvider),
            "analyst" => Ok(Role::Analyst),
            "readonly" => Ok(Role::Readonly),
            other => Err(Error::configuration(format!("Unknown role: {}", other))),
        }
    }
}

// =============================================================================
// Query Request
// =============================================================================

/// A single inbound query. Created per call and dropped once the call returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Correlation ID for logs and audit metadata.
    pub trace_id: String,
    /// Requester identity.
    pub user_id: String,
    /// Requester role.
    pub role: Role,
    /// Natural-language text.
    pub text: String,
    /// Explicit SQL that bypasses generation (still validated).
    pub sql_override: Option<String>,
}

impl QueryRequest {
    /// Create a natural-language request.
    pub fn new(user_id: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            role,
            text: text.into(),
            sql_override: None,
        }
    }

    /// Supply the SQL directly instead of asking the model for it.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql_override = Some(sql.into());
        self
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }
}
