//! Error types for the PHI query gateway.

use thiserror::Error;

/// Result type alias using the gateway's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the PHI query gateway.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Governance Errors
    // =========================================================================
    #[error("Query validation rejected: {0}")]
    ValidationRejected(String),

    #[error("Role '{role}' is not authorized to access PHI fields: {fields:?}")]
    AuthorizationDenied { role: String, fields: Vec<String> },

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Audit sink error: {0}")]
    Audit(String),

    // =========================================================================
    // Execution Errors
    // =========================================================================
    #[error("Execution fault: {0}")]
    ExecutionFault(String),

    #[error("Warehouse error: {0}")]
    Warehouse(String),

    #[error("Model provider error: {0}")]
    ModelProvider(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // =========================================================================
    // Startup Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a validation rejection.
    pub fn validation_rejected(msg: impl Into<String>) -> Self {
        Self::ValidationRejected(msg.into())
    }

    /// Create an execution fault.
    pub fn execution_fault(msg: impl Into<String>) -> Self {
        Self::ExecutionFault(msg.into())
    }

    /// Create a warehouse error.
    pub fn warehouse(msg: impl Into<String>) -> Self {
        Self::Warehouse(msg.into())
    }

    /// Create a model provider error.
    pub fn model_provider(msg: impl Into<String>) -> Self {
        Self::ModelProvider(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a decryption error.
    pub fn decryption(msg: impl Into<String>) -> Self {
        Self::Decryption(msg.into())
    }

    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an audit sink error.
    pub fn audit(msg: impl Into<String>) -> Self {
        Self::Audit(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error belongs to the execution-fault class: anything the
    /// warehouse or model collaborators raise, including timeouts.
    pub fn is_execution_fault(&self) -> bool {
        matches!(
            self,
            Self::ExecutionFault(_) | Self::Warehouse(_) | Self::ModelProvider(_) | Self::Timeout(_)
        )
    }
}
