//! Integration tests for the audit trail and startup services.

use std::sync::Arc;

use phi_query_core::config::AppConfig;
use phi_query_governance::{
    run_doctor, AuditAction, AuditEvent, AuditFilter, AuditOutcome, AuditSink, AuditTrail,
    GovernanceServices, InMemoryAuditSink, JsonlAuditSink,
};
use secrecy::Secret;
use serde_json::json;

#[tokio::test]
async fn test_jsonl_chain_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("audit.jsonl");

    {
        let trail = AuditTrail::new(Arc::new(JsonlAuditSink::open(&path).unwrap()));
        trail
            .log_query("u1", "hash-1", 2, 3.25, &["ssn".to_string()])
            .await;
        trail
            .log_access(
                "u2",
                AuditAction::QueryValidate,
                "warehouse_agent",
                AuditOutcome::Denied,
                false,
                json!({"reason": "destructive"}),
            )
            .await;
    }

    // A reopened sink continues the same chain.
    let sink = JsonlAuditSink::open(&path).unwrap();
    let trail = AuditTrail::new(Arc::new(JsonlAuditSink::open(&path).unwrap()));
    trail
        .log_phi_access("u1", "42", &["name".to_string()], "treatment")
        .await;

    assert_eq!(sink.verify_chain().await.unwrap(), 3);
}

#[tokio::test]
async fn test_jsonl_tampering_detected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let sink = JsonlAuditSink::open(&path).unwrap();

    for user in ["u1", "u2", "u3"] {
        sink.record(&AuditEvent::new(
            user,
            AuditAction::AgentQuery,
            "warehouse_agent",
            AuditOutcome::Started,
        ))
        .await
        .unwrap();
    }
    assert_eq!(sink.verify_chain().await.unwrap(), 3);

    let content = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, content.replacen("\"u2\"", "\"mallory\"", 1)).unwrap();

    let err = sink.verify_chain().await.unwrap_err();
    assert!(err.to_string().contains("record 2"));
}

#[tokio::test]
async fn test_jsonl_query_filters() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(JsonlAuditSink::open(dir.path().join("audit.jsonl")).unwrap());
    let trail = AuditTrail::new(sink);

    trail
        .log_query("u1", "h1", 1, 1.0, &["ssn".to_string()])
        .await;
    trail.log_query("u1", "h2", 0, 1.0, &[]).await;
    trail
        .log_access(
            "u2",
            AuditAction::AgentQuery,
            "warehouse_agent",
            AuditOutcome::Error,
            false,
            json!({}),
        )
        .await;

    let phi = trail
        .query(AuditFilter {
            phi_only: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(phi.len(), 1);
    assert_eq!(phi[0].metadata["query_hash"], "h1");

    let u1 = trail
        .query(AuditFilter {
            user_id: Some("u1".to_string()),
            action: Some(AuditAction::QueryExecute),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(u1.len(), 2);

    let limited = trail
        .query(AuditFilter {
            limit: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].user_id, "u1");
}

#[tokio::test]
async fn test_metadata_is_redacted_before_write() {
    let sink = Arc::new(InMemoryAuditSink::new());
    let trail = AuditTrail::new(sink.clone());

    trail
        .log_access(
            "u1",
            AuditAction::AgentQuery,
            "warehouse_agent",
            AuditOutcome::Started,
            false,
            json!({"api_key": "sk-live", "input": "list patients"}),
        )
        .await;

    let events = sink.events();
    assert_eq!(events[0].metadata["api_key"], "***REDACTED***");
    assert_eq!(events[0].metadata["input"], "list patients");
}

#[tokio::test]
async fn test_services_write_to_configured_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");

    let mut config = AppConfig::default();
    config.security.encryption_key = Some(Secret::new("integration-passphrase".into()));
    config.compliance.audit_log_path = Some(path.to_string_lossy().into_owned());

    let services = GovernanceServices::from_config(&config).unwrap();
    services
        .audit
        .log_query("u1", "h", 0, 0.5, &[])
        .await;

    let events = services.audit.query(AuditFilter::default()).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(
        JsonlAuditSink::open(&path).unwrap().verify_chain().await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_doctor_reports_derived_key() {
    let mut config = AppConfig::default();
    config.security.encryption_key = Some(Secret::new("integration-passphrase".into()));

    let services = GovernanceServices::from_config(&config).unwrap();
    let report = run_doctor(&services, &config, None).await;

    let encryption = report
        .checks
        .iter()
        .find(|c| c.name == "Encryption")
        .unwrap();
    assert_eq!(encryption.status, "warn");
    assert!(report.is_healthy());
}

#[tokio::test]
async fn test_doctor_flags_non_compliant_config() {
    let mut config = AppConfig::default();
    config.security.enable_encryption = false;
    config.compliance.enable_audit_trail = false;

    let services = GovernanceServices::from_config(&config).unwrap();
    let report = run_doctor(&services, &config, None).await;

    assert_eq!(report.overall_status, "degraded");
    assert!(report
        .checks
        .iter()
        .any(|c| c.name == "HIPAA configuration" && c.status == "fail"));
}
