//! Governance layer for PHI queries.
//!
//! This crate provides:
//! - Field-level encryption for PHI at rest
//! - Role-based access to PHI columns
//! - Hash-chained audit trail
//! - Destructive statement filtering
//! - Per-user rate limiting
//! - Tracing and metrics setup

pub mod access;
pub mod audit;
pub mod crypto;
pub mod doctor;
pub mod metrics;
pub mod privacy;
pub mod rate_limit;
pub mod services;
pub mod tracing_layer;
pub mod validator;

pub use access::{AccessPolicy, PhiFieldRegistry, PHI_PLACEHOLDER};
pub use audit::{
    AuditAction, AuditEvent, AuditFilter, AuditOutcome, AuditSink, AuditTrail, FanoutAuditSink,
    InMemoryAuditSink, JsonlAuditSink, TracingAuditSink,
};
pub use crypto::{hash_phi, EncryptionService, KeySource};
pub use doctor::{run_doctor, CheckResult, DoctorReport};
pub use metrics::{setup_metrics_recorder, track_phi_result, track_query, track_tokens};
pub use privacy::{redact_metadata, truncate_for_log};
pub use rate_limit::QueryRateLimiter;
pub use services::GovernanceServices;
pub use tracing_layer::configure_tracing;
pub use validator::QueryValidator;
