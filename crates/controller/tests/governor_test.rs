//! End-to-end tests for the query governor driven by scripted collaborators.

use std::sync::Arc;
use std::time::Duration;

use phi_query_controller::{
    Governor, GovernorBuilder, GovernorSettings, QueryState, RATE_LIMITED_MESSAGE,
    VALIDATION_FAILED_MESSAGE,
};
use phi_query_core::config::AppConfig;
use phi_query_core::mocks::{MockLlm, MockWarehouse};
use phi_query_core::{FieldSchema, QueryRequest, Role, Row, SchemaInfo};
use phi_query_governance::{
    AccessPolicy, AuditAction, AuditEvent, AuditOutcome, AuditTrail, GovernanceServices,
    InMemoryAuditSink, PhiFieldRegistry, QueryRateLimiter,
};

const PATIENT_SQL: &str = "SELECT name, ssn FROM patients LIMIT 10";

fn policy() -> AccessPolicy {
    AccessPolicy::new(Arc::new(PhiFieldRegistry::new([
        "patient_id",
        "ssn",
        "medical_record_number",
        "name",
        "dob",
    ])))
}

fn patient_rows() -> Vec<Row> {
    vec![
        Row::new()
            .with("name", "Ada Lovelace")
            .with("ssn", "123-45-6789")
            .with("id", 1i64),
        Row::new()
            .with("name", "Alan Turing")
            .with("ssn", "987-65-4321")
            .with("id", 2i64),
    ]
}

fn settings() -> GovernorSettings {
    GovernorSettings {
        summarize_results: false,
        ..GovernorSettings::default()
    }
}

fn builder(
    llm: &Arc<MockLlm>,
    warehouse: &Arc<MockWarehouse>,
    sink: &Arc<InMemoryAuditSink>,
) -> GovernorBuilder {
    Governor::builder()
        .with_settings(settings())
        .with_llm(llm.clone())
        .with_warehouse(warehouse.clone())
        .with_access_policy(policy())
        .with_audit(AuditTrail::new(sink.clone()))
}

fn terminal(events: &[AuditEvent]) -> Vec<&AuditEvent> {
    events.iter().filter(|e| e.outcome.is_terminal()).collect()
}

#[tokio::test]
async fn test_destructive_request_denied_before_execution() {
    let llm = Arc::new(MockLlm::constant("DELETE FROM patients"));
    let warehouse = Arc::new(MockWarehouse::with_rows(patient_rows()));
    let sink = Arc::new(InMemoryAuditSink::new());
    let governor = builder(&llm, &warehouse, &sink).build().unwrap();

    let response = governor
        .handle(QueryRequest::new("u1", Role::Admin, "DELETE FROM patients"))
        .await;

    assert_eq!(response.text, VALIDATION_FAILED_MESSAGE);
    assert_eq!(response.state, QueryState::Errored);
    assert_eq!(warehouse.execute_count(), 0);

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].outcome, AuditOutcome::Started);
    let closing = terminal(&events);
    assert_eq!(closing.len(), 1);
    assert_eq!(closing[0].outcome, AuditOutcome::Denied);
    assert_eq!(closing[0].action, AuditAction::QueryValidate);
}

#[tokio::test]
async fn test_sql_override_is_still_validated() {
    let llm = Arc::new(MockLlm::constant("SELECT 1 LIMIT 1"));
    let warehouse = Arc::new(MockWarehouse::new());
    let sink = Arc::new(InMemoryAuditSink::new());
    let governor = builder(&llm, &warehouse, &sink).build().unwrap();

    let request =
        QueryRequest::new("u1", Role::Admin, "clean up").with_sql("drop table patients");
    let response = governor.handle(request).await;

    assert_eq!(response.outcome, AuditOutcome::Denied);
    assert_eq!(llm.call_count(), 0);
    assert_eq!(warehouse.execute_count(), 0);
}

#[tokio::test]
async fn test_phi_columns_detected_and_audited() {
    let llm = Arc::new(MockLlm::constant(&format!("```sql\n{}\n```", PATIENT_SQL)));
    let warehouse = Arc::new(MockWarehouse::with_rows(patient_rows()));
    let sink = Arc::new(InMemoryAuditSink::new());
    let governor = builder(&llm, &warehouse, &sink).build().unwrap();

    let request = QueryRequest::new(
        "dr_smith",
        Role::HealthcareProvider,
        "Show names and SSNs of patients",
    );
    let trace_id = request.trace_id.clone();
    let response = governor.handle(request).await;

    assert!(response.is_success());
    assert_eq!(response.phi_fields, vec!["name".to_string(), "ssn".to_string()]);
    assert_eq!(response.row_count, 2);
    assert_eq!(response.sql.as_deref(), Some(PATIENT_SQL));
    assert_eq!(warehouse.executed_sql(), vec![PATIENT_SQL.to_string()]);
    assert!(response.text.starts_with("Found 2 results. Showing first 2:"));
    assert!(response
        .text
        .ends_with(&format!("---\nSQL Query Used: {}", PATIENT_SQL)));

    let events = sink.events();
    let closing = terminal(&events);
    assert_eq!(closing.len(), 1);
    let event = closing[0];
    assert_eq!(event.outcome, AuditOutcome::Success);
    assert_eq!(event.action, AuditAction::QueryExecute);
    assert_eq!(event.resource, "warehouse");
    assert!(event.phi_accessed);
    assert_eq!(event.metadata["result_count"], 2);
    assert_eq!(
        event.metadata["query_hash"],
        response.query_hash.clone().unwrap()
    );
    assert_eq!(
        event.metadata["sanitized_query"],
        "SELECT [PHI_FIELD], [PHI_FIELD] FROM patients LIMIT 10"
    );
    assert_eq!(event.metadata["trace_id"], trace_id.as_str());
    assert_eq!(event.metadata["phi_fields"], serde_json::json!(["name", "ssn"]));
}

#[tokio::test]
async fn test_result_without_phi_is_not_flagged() {
    let llm = Arc::new(MockLlm::constant("SELECT count(*) AS total FROM visits LIMIT 1"));
    let warehouse = Arc::new(MockWarehouse::with_rows(vec![Row::new().with("total", 42i64)]));
    let sink = Arc::new(InMemoryAuditSink::new());
    let governor = builder(&llm, &warehouse, &sink).build().unwrap();

    let response = governor
        .handle(QueryRequest::new("u1", Role::Readonly, "How many visits?"))
        .await;

    assert!(response.is_success());
    assert!(response.phi_fields.is_empty());
    let events = sink.events();
    assert!(!terminal(&events)[0].phi_accessed);
}

#[tokio::test]
async fn test_warehouse_timeout_reported_as_failure() {
    let llm = Arc::new(MockLlm::constant(PATIENT_SQL));
    let warehouse = Arc::new(MockWarehouse::timing_out("query exceeded 300s"));
    let sink = Arc::new(InMemoryAuditSink::new());
    let governor = builder(&llm, &warehouse, &sink).build().unwrap();

    let response = governor
        .handle(QueryRequest::new("u1", Role::Admin, "Show patients"))
        .await;

    assert!(response.text.contains("failed"));
    assert_eq!(response.state, QueryState::Errored);
    assert_eq!(response.outcome, AuditOutcome::Error);

    let events = sink.events();
    let closing = terminal(&events);
    assert_eq!(closing.len(), 1);
    assert_eq!(closing[0].outcome, AuditOutcome::Error);
    assert_eq!(closing[0].action, AuditAction::QueryExecute);
    assert!(closing[0].metadata["error"]
        .as_str()
        .unwrap()
        .contains("query exceeded 300s"));
}

#[tokio::test(start_paused = true)]
async fn test_slow_warehouse_cut_off_by_governor_timeout() {
    let llm = Arc::new(MockLlm::constant(PATIENT_SQL));
    let warehouse = Arc::new(
        MockWarehouse::with_rows(patient_rows()).with_delay(Duration::from_secs(30)),
    );
    let sink = Arc::new(InMemoryAuditSink::new());
    let governor = builder(&llm, &warehouse, &sink)
        .with_settings(GovernorSettings {
            execution_timeout: Duration::from_secs(1),
            ..settings()
        })
        .build()
        .unwrap();

    let response = governor
        .handle(QueryRequest::new("u1", Role::Admin, "Show patients"))
        .await;

    assert!(response.text.starts_with("Query execution failed: Timeout"));
    assert_eq!(terminal(&sink.events())[0].outcome, AuditOutcome::Error);
}

#[tokio::test]
async fn test_analyst_cannot_receive_phi_rows() {
    let llm = Arc::new(MockLlm::constant(PATIENT_SQL));
    let warehouse = Arc::new(MockWarehouse::with_rows(patient_rows()));
    let sink = Arc::new(InMemoryAuditSink::new());
    let governor = builder(&llm, &warehouse, &sink).build().unwrap();

    let response = governor
        .handle(QueryRequest::new("analyst1", Role::Analyst, "Show patients"))
        .await;

    assert_eq!(response.state, QueryState::Errored);
    assert_eq!(response.outcome, AuditOutcome::Denied);
    assert!(response.text.contains("Access denied"));
    assert!(!response.text.contains("123-45-6789"));
    assert!(!response.text.contains("Ada Lovelace"));

    let events = sink.events();
    let closing = terminal(&events);
    assert_eq!(closing.len(), 1);
    assert_eq!(closing[0].outcome, AuditOutcome::Denied);
    assert_eq!(closing[0].action, AuditAction::QueryExecute);
    assert!(closing[0].phi_accessed);
    assert!(closing[0].metadata["reason"].is_string());
    assert!(closing[0].metadata["sanitized_query"].is_string());
}

#[tokio::test]
async fn test_table_listing_skips_generation() {
    let llm = Arc::new(MockLlm::constant(PATIENT_SQL));
    let warehouse = Arc::new(MockWarehouse::new().with_schema(SchemaInfo::Tables {
        dataset: "clinical".into(),
        tables: vec!["patients".into(), "visits".into()],
    }));
    let sink = Arc::new(InMemoryAuditSink::new());
    let governor = builder(&llm, &warehouse, &sink).build().unwrap();

    let response = governor
        .handle(QueryRequest::new("u1", Role::Readonly, "What tables are available?"))
        .await;

    assert!(response.is_success());
    assert!(response.text.contains("  - visits"));
    assert!(response.sql.is_none());
    assert_eq!(llm.call_count(), 0);
    assert_eq!(warehouse.execute_count(), 0);

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].action, AuditAction::SchemaLookup);
    assert_eq!(events[1].outcome, AuditOutcome::Success);
}

#[tokio::test]
async fn test_table_schema_lookup() {
    let llm = Arc::new(MockLlm::constant(PATIENT_SQL));
    let warehouse = Arc::new(MockWarehouse::new().with_schema(SchemaInfo::Table {
        table: "patients".into(),
        fields: vec![
            FieldSchema::new("id", "INTEGER").with_mode("REQUIRED"),
            FieldSchema::new("ssn", "STRING"),
        ],
    }));
    let sink = Arc::new(InMemoryAuditSink::new());
    let governor = builder(&llm, &warehouse, &sink).build().unwrap();

    let response = governor
        .handle(QueryRequest::new(
            "u1",
            Role::Analyst,
            "Show me the schema for patients?",
        ))
        .await;
    assert!(response.text.starts_with("Schema for table 'patients'"));
    assert_eq!(
        warehouse.describe_calls(),
        vec![("clinical".to_string(), Some("patients".to_string()))]
    );

    let missing = governor
        .handle(QueryRequest::new("u1", Role::Analyst, "Show the schema for nope"))
        .await;
    assert!(missing.text.starts_with("Failed to retrieve schema"));
    assert_eq!(missing.outcome, AuditOutcome::Error);
    let events = sink.events();
    assert_eq!(events.last().unwrap().resource, "clinical.nope");
}

#[tokio::test]
async fn test_rate_limited_user_is_denied() {
    let llm = Arc::new(MockLlm::constant("SELECT id FROM visits LIMIT 5"));
    let warehouse = Arc::new(MockWarehouse::with_rows(vec![Row::new().with("id", 1i64)]));
    let sink = Arc::new(InMemoryAuditSink::new());
    let governor = builder(&llm, &warehouse, &sink)
        .with_rate_limiter(Arc::new(QueryRateLimiter::new(1, 100).unwrap()))
        .build()
        .unwrap();

    let first = governor
        .handle(QueryRequest::new("u1", Role::Admin, "List visit ids"))
        .await;
    assert!(first.is_success());

    let second = governor
        .handle(QueryRequest::new("u1", Role::Admin, "List visit ids"))
        .await;
    assert_eq!(second.text, RATE_LIMITED_MESSAGE);
    assert_eq!(second.outcome, AuditOutcome::Denied);
    assert_eq!(warehouse.execute_count(), 1);

    let other = governor
        .handle(QueryRequest::new("u2", Role::Admin, "List visit ids"))
        .await;
    assert!(other.is_success());

    let denied: Vec<_> = sink
        .events()
        .into_iter()
        .filter(|e| e.outcome == AuditOutcome::Denied)
        .collect();
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].action, AuditAction::AgentQuery);
}

#[tokio::test]
async fn test_summary_replaces_rendered_rows() {
    let llm = Arc::new(MockLlm::new(vec![
        PATIENT_SQL.to_string(),
        "Two patients were found.".to_string(),
    ]));
    let warehouse = Arc::new(MockWarehouse::with_rows(patient_rows()));
    let sink = Arc::new(InMemoryAuditSink::new());
    let governor = builder(&llm, &warehouse, &sink)
        .with_settings(GovernorSettings::default())
        .build()
        .unwrap();

    let response = governor
        .handle(QueryRequest::new("u1", Role::Admin, "Who are our patients?"))
        .await;

    assert_eq!(
        response.text,
        format!("Two patients were found.\n\n---\nSQL Query Used: {}", PATIENT_SQL)
    );
    let calls = llm.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1][1].content.starts_with("User asked: Who are our patients?"));
    assert!(calls[1][1].content.contains("Found 2 results"));
}

#[tokio::test]
async fn test_summary_failure_falls_back_to_rows() {
    let llm = Arc::new(MockLlm::new(Vec::new()));
    let warehouse = Arc::new(MockWarehouse::with_rows(patient_rows()));
    let sink = Arc::new(InMemoryAuditSink::new());
    let governor = builder(&llm, &warehouse, &sink)
        .with_settings(GovernorSettings::default())
        .build()
        .unwrap();

    let request = QueryRequest::new("u1", Role::Admin, "patients").with_sql(PATIENT_SQL);
    let response = governor.handle(request).await;

    assert!(response.is_success());
    assert!(response.text.starts_with("Found 2 results"));
    assert_eq!(llm.call_count(), 1);
}

#[tokio::test]
async fn test_generation_failure_is_audited() {
    let llm = Arc::new(MockLlm::constant(PATIENT_SQL).failing_first(1));
    let warehouse = Arc::new(MockWarehouse::with_rows(patient_rows()));
    let sink = Arc::new(InMemoryAuditSink::new());
    let governor = builder(&llm, &warehouse, &sink).build().unwrap();

    let response = governor
        .handle(QueryRequest::new("u1", Role::Admin, "Show patients"))
        .await;

    assert!(response.text.starts_with("Agent execution failed"));
    assert_eq!(warehouse.execute_count(), 0);
    let events = sink.events();
    let closing = terminal(&events);
    assert_eq!(closing.len(), 1);
    assert_eq!(closing[0].action, AuditAction::AgentQuery);
    assert_eq!(closing[0].outcome, AuditOutcome::Error);
}

#[tokio::test(start_paused = true)]
async fn test_generation_retried_with_backoff() {
    let llm = Arc::new(MockLlm::constant(PATIENT_SQL).failing_first(2));
    let warehouse = Arc::new(MockWarehouse::with_rows(patient_rows()));
    let sink = Arc::new(InMemoryAuditSink::new());
    let governor = builder(&llm, &warehouse, &sink)
        .with_settings(GovernorSettings {
            llm_retries: 2,
            ..settings()
        })
        .build()
        .unwrap();

    let response = governor
        .handle(QueryRequest::new("u1", Role::Admin, "Show patients"))
        .await;

    assert!(response.is_success());
    assert_eq!(llm.call_count(), 3);
}

#[tokio::test]
async fn test_empty_model_reply_is_rejected() {
    let llm = Arc::new(MockLlm::constant("```sql\n```"));
    let warehouse = Arc::new(MockWarehouse::with_rows(patient_rows()));
    let sink = Arc::new(InMemoryAuditSink::new());
    let governor = builder(&llm, &warehouse, &sink).build().unwrap();

    let response = governor
        .handle(QueryRequest::new("u1", Role::Admin, "Show patients"))
        .await;

    assert_eq!(response.text, VALIDATION_FAILED_MESSAGE);
    assert_eq!(warehouse.execute_count(), 0);
}

#[tokio::test]
async fn test_started_event_precedes_terminal_and_truncates_input() {
    let llm = Arc::new(MockLlm::constant("SELECT id FROM visits LIMIT 5"));
    let warehouse = Arc::new(MockWarehouse::new());
    let sink = Arc::new(InMemoryAuditSink::new());
    let governor = builder(&llm, &warehouse, &sink).build().unwrap();

    let long_text = "x".repeat(300);
    let request = QueryRequest::new("u1", Role::Readonly, long_text).with_trace("trace-42");
    let response = governor.handle(request).await;
    assert_eq!(response.text, "Query executed successfully. No results found.\n\n---\nSQL Query Used: SELECT id FROM visits LIMIT 5");

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].outcome, AuditOutcome::Started);
    assert_eq!(events[0].action, AuditAction::AgentQuery);
    assert_eq!(events[0].resource, "warehouse_agent");
    let preview = events[0].metadata["input"].as_str().unwrap();
    assert_eq!(preview.chars().count(), 100);
    assert!(preview.ends_with("..."));
    assert_eq!(events[1].metadata["trace_id"], "trace-42");
    assert!(events[0].timestamp <= events[1].timestamp);
}

#[tokio::test]
async fn test_builder_requires_collaborators() {
    assert!(Governor::builder().build().is_err());

    let sink = Arc::new(InMemoryAuditSink::new());
    let result = Governor::builder()
        .with_llm(Arc::new(MockLlm::constant("SELECT 1")))
        .with_access_policy(policy())
        .with_audit(AuditTrail::new(sink))
        .build();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_governor_from_config() {
    let mut config = AppConfig::default();
    config.security.enable_encryption = false;
    config.governor.summarize_results = false;
    config.warehouse.max_results = 1;

    let services = GovernanceServices::from_config(&config).unwrap();
    let warehouse = Arc::new(MockWarehouse::with_rows(patient_rows()));
    let governor = GovernorBuilder::from_config(&config, &services)
        .with_llm(Arc::new(MockLlm::constant(PATIENT_SQL)))
        .with_warehouse(warehouse)
        .build()
        .unwrap();

    assert_eq!(governor.settings().max_rows, 1);
    let response = governor
        .handle(QueryRequest::new("u1", Role::Admin, "Show patients"))
        .await;
    assert!(response.is_success());
    assert_eq!(response.row_count, 1);
}

#[test]
fn test_settings_cap_display_rows() {
    let mut config = AppConfig::default();
    config.governor.display_rows = 50;
    let settings = GovernorSettings::from_app_config(&config);
    assert_eq!(settings.display_rows, 10);
}
