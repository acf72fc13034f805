//! Query governor.
//!
//! Every request walks the same state machine:
//! 1. `Received`: record a STARTED audit event
//! 2. `IntentRouted`: schema lookups short-circuit to the warehouse catalog
//! 3. `Validated`: the generated or supplied SQL passes the keyword denylist
//! 4. `Executed`: the warehouse ran the statement within the timeout
//! 5. `Audited`: PHI columns detected and the terminal event recorded
//! 6. `Responded`: rows rendered and optionally summarized
//!
//! Any failure moves the request to `Errored`. Failures never escape
//! [`Governor::handle`]; they become a user-facing message and exactly one
//! terminal audit event.

use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

use phi_query_core::{
    config::{AppConfig, MAX_DISPLAY_ROWS},
    traits::{ChatMessage, LlmClient, Warehouse},
    Error, QueryRequest, QueryResult, Result, SqlStatement,
};
use phi_query_governance::{
    metrics as governance_metrics, truncate_for_log, AccessPolicy, AuditAction, AuditEvent,
    AuditOutcome, AuditTrail, QueryRateLimiter, QueryValidator,
};

use crate::intent::{route_intent, Intent};
use crate::prompt::{extract_sql, sql_generation_prompt, summary_prompt, SUMMARY_SYSTEM_PROMPT};
use crate::render::{render_schema, ResultRenderer};

const AGENT_RESOURCE: &str = "warehouse_agent";
const WAREHOUSE_RESOURCE: &str = "warehouse";

pub const VALIDATION_FAILED_MESSAGE: &str =
    "Query validation failed. Query may contain unauthorized operations.";
pub const RATE_LIMITED_MESSAGE: &str = "Rate limit exceeded. Please try again later.";

/// Per-request processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryState {
    Received,
    IntentRouted,
    Validated,
    Executed,
    Audited,
    Responded,
    Errored,
}

/// Governor tuning, usually taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct GovernorSettings {
    /// Dataset named in prompts and schema lookups.
    pub dataset_id: String,
    /// Upper bound on one warehouse execution.
    pub execution_timeout: Duration,
    /// Row cap passed to the warehouse.
    pub max_rows: usize,
    /// Rows included in the rendered response.
    pub display_rows: usize,
    /// Ask the model for a natural-language summary of the rows.
    pub summarize_results: bool,
    /// Extra attempts for each model call.
    pub llm_retries: u32,
    /// First backoff delay; doubles on each retry.
    pub retry_base_backoff: Duration,
    /// Characters of the request text kept in the STARTED event.
    pub input_preview_chars: usize,
}

impl GovernorSettings {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            dataset_id: config.warehouse.dataset_id.clone(),
            execution_timeout: Duration::from_secs(config.warehouse.timeout_secs),
            max_rows: config.warehouse.max_results,
            display_rows: config.governor.display_rows.min(MAX_DISPLAY_ROWS),
            summarize_results: config.governor.summarize_results,
            llm_retries: config.governor.llm_retries,
            input_preview_chars: config.governor.input_preview_chars,
            ..Self::default()
        }
    }
}

impl Default for GovernorSettings {
    fn default() -> Self {
        Self {
            dataset_id: "clinical".to_string(),
            execution_timeout: Duration::from_secs(300),
            max_rows: 1000,
            display_rows: MAX_DISPLAY_ROWS,
            summarize_results: true,
            llm_retries: 0,
            retry_base_backoff: Duration::from_millis(200),
            input_preview_chars: 100,
        }
    }
}

/// What the caller gets back for one request.
#[derive(Debug, Clone, Serialize)]
pub struct GovernedResponse {
    /// User-facing text.
    pub text: String,
    /// `Responded` or `Errored`.
    pub state: QueryState,
    /// Outcome of the terminal audit event.
    pub outcome: AuditOutcome,
    /// Statement used, when one was produced.
    pub sql: Option<String>,
    /// Content hash of `sql`.
    pub query_hash: Option<String>,
    pub row_count: usize,
    /// PHI columns present in the result.
    pub phi_fields: Vec<String>,
}

impl GovernedResponse {
    fn new(text: impl Into<String>, state: QueryState, outcome: AuditOutcome) -> Self {
        Self {
            text: text.into(),
            state,
            outcome,
            sql: None,
            query_hash: None,
            row_count: 0,
            phi_fields: Vec::new(),
        }
    }

    fn errored(text: impl Into<String>, outcome: AuditOutcome) -> Self {
        Self::new(text, QueryState::Errored, outcome)
    }

    fn with_statement(mut self, statement: &SqlStatement) -> Self {
        self.sql = Some(statement.text().to_string());
        self.query_hash = Some(statement.hash().to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        self.state == QueryState::Responded && self.outcome == AuditOutcome::Success
    }
}

/// Orchestrates validation, execution, PHI detection and auditing.
///
/// Holds only shared, read-only handles; one instance serves concurrent
/// requests.
pub struct Governor {
    pub(crate) settings: GovernorSettings,
    pub(crate) llm: Arc<dyn LlmClient>,
    pub(crate) warehouse: Arc<dyn Warehouse>,
    pub(crate) access: AccessPolicy,
    pub(crate) audit: AuditTrail,
    pub(crate) validator: QueryValidator,
    pub(crate) rate_limiter: Option<Arc<QueryRateLimiter>>,
    pub(crate) renderer: Arc<dyn ResultRenderer>,
}

impl Governor {
    /// Create a new builder for Governor.
    pub fn builder() -> crate::builder::GovernorBuilder {
        crate::builder::GovernorBuilder::new()
    }

    pub fn settings(&self) -> &GovernorSettings {
        &self.settings
    }

    /// Process one request end to end.
    pub async fn handle(&self, request: QueryRequest) -> GovernedResponse {
        let span = tracing::info_span!(
            "governed_query",
            trace_id = %request.trace_id,
            user_id = %request.user_id,
            role = %request.role
        );
        let start = Instant::now();

        let response = self.process(&request).instrument(span).await;

        let outcome = match response.outcome {
            AuditOutcome::Success => "success",
            AuditOutcome::Denied => "denied",
            _ => "error",
        };
        governance_metrics::track_query(outcome, start.elapsed().as_secs_f64());
        response
    }

    async fn process(&self, request: &QueryRequest) -> GovernedResponse {
        // RECEIVED
        self.audit
            .log_access(
                &request.user_id,
                AuditAction::AgentQuery,
                AGENT_RESOURCE,
                AuditOutcome::Started,
                false,
                json!({
                    "input": truncate_for_log(&request.text, self.settings.input_preview_chars),
                    "role": request.role.as_str(),
                    "trace_id": request.trace_id,
                }),
            )
            .await;

        if let Some(limiter) = &self.rate_limiter {
            if let Err(e) = limiter.check(&request.user_id) {
                self.audit
                    .log_access(
                        &request.user_id,
                        AuditAction::AgentQuery,
                        AGENT_RESOURCE,
                        AuditOutcome::Denied,
                        false,
                        json!({"reason": e.to_string(), "trace_id": request.trace_id}),
                    )
                    .await;
                return GovernedResponse::errored(RATE_LIMITED_MESSAGE, AuditOutcome::Denied);
            }
        }

        // INTENT_ROUTED
        if request.sql_override.is_none() {
            if let Intent::Metadata { table } = route_intent(&request.text) {
                tracing::debug!(table = ?table, "Routing to schema lookup");
                return self.schema_lookup(request, table.as_deref()).await;
            }
        }

        let reply = match &request.sql_override {
            Some(sql) => sql.clone(),
            None => match self.generate_sql(request).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::error!(error = %e, "SQL generation failed");
                    self.audit
                        .log_access(
                            &request.user_id,
                            AuditAction::AgentQuery,
                            AGENT_RESOURCE,
                            AuditOutcome::Error,
                            false,
                            json!({"error": e.to_string(), "trace_id": request.trace_id}),
                        )
                        .await;
                    return GovernedResponse::errored(
                        format!("Agent execution failed: {}", e),
                        AuditOutcome::Error,
                    );
                }
            },
        };
        let statement = SqlStatement::new(extract_sql(&reply));
        let sanitized = self.access.sanitize_query(statement.text());
        tracing::info!(query = %sanitized, query_hash = %statement.hash(), "generated_query");

        // VALIDATED
        if let Err(e) = self.validator.check(statement.text()) {
            self.audit
                .log_access(
                    &request.user_id,
                    AuditAction::QueryValidate,
                    WAREHOUSE_RESOURCE,
                    AuditOutcome::Denied,
                    false,
                    json!({
                        "reason": e.to_string(),
                        "query_hash": statement.hash(),
                        "sanitized_query": sanitized,
                        "trace_id": request.trace_id,
                    }),
                )
                .await;
            return GovernedResponse::errored(VALIDATION_FAILED_MESSAGE, AuditOutcome::Denied)
                .with_statement(&statement);
        }

        // EXECUTED
        let result = match self.execute(&statement).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, query_hash = %statement.hash(), "query_execution_error");
                self.audit
                    .log_access(
                        &request.user_id,
                        AuditAction::QueryExecute,
                        WAREHOUSE_RESOURCE,
                        AuditOutcome::Error,
                        false,
                        json!({
                            "error": e.to_string(),
                            "query_hash": statement.hash(),
                            "sanitized_query": sanitized,
                            "trace_id": request.trace_id,
                        }),
                    )
                    .await;
                return GovernedResponse::errored(
                    format!("Query execution failed: {}", e),
                    AuditOutcome::Error,
                )
                .with_statement(&statement);
            }
        };

        // AUDITED
        let phi_fields: Vec<String> = result.phi_fields.iter().cloned().collect();
        let context = json!({
            "sanitized_query": sanitized,
            "trace_id": request.trace_id,
        });

        if let Err(e) = self
            .access
            .authorize(request.role, phi_fields.iter().map(String::as_str))
        {
            let mut event = AuditEvent::query_executed(
                &request.user_id,
                statement.hash(),
                result.row_count(),
                result.execution_time_ms,
                &phi_fields,
            )
            .with_metadata_value(context)
            .with_metadata("reason", e.to_string());
            event.outcome = AuditOutcome::Denied;
            self.audit.record(event).await;

            let mut response = GovernedResponse::errored(
                format!(
                    "Access denied: role '{}' may not view PHI fields: {}",
                    request.role,
                    phi_fields.join(", ")
                ),
                AuditOutcome::Denied,
            )
            .with_statement(&statement);
            response.row_count = result.row_count();
            response.phi_fields = phi_fields;
            return response;
        }

        self.audit
            .log_query_with(
                &request.user_id,
                statement.hash(),
                result.row_count(),
                result.execution_time_ms,
                &phi_fields,
                context,
            )
            .await;
        if !phi_fields.is_empty() {
            governance_metrics::track_phi_result(phi_fields.len());
        }

        // RESPONDED
        let rendered = self.renderer.render(&result, self.settings.display_rows);
        let body = if self.settings.summarize_results {
            match self.summarize(request, statement.text(), &rendered).await {
                Ok(summary) => summary,
                Err(e) => {
                    tracing::warn!(error = %e, "Result summary failed, returning rows");
                    rendered
                }
            }
        } else {
            rendered
        };

        let mut response = GovernedResponse::new(
            format!("{}\n\n---\nSQL Query Used: {}", body, statement.text()),
            QueryState::Responded,
            AuditOutcome::Success,
        )
        .with_statement(&statement);
        response.row_count = result.row_count();
        response.phi_fields = phi_fields;
        response
    }

    async fn schema_lookup(&self, request: &QueryRequest, table: Option<&str>) -> GovernedResponse {
        let dataset = &self.settings.dataset_id;
        let resource = match table {
            Some(table) => format!("{}.{}", dataset, table),
            None => dataset.clone(),
        };

        match self.warehouse.describe(dataset, table).await {
            Ok(info) => {
                self.audit
                    .log_access(
                        &request.user_id,
                        AuditAction::SchemaLookup,
                        &resource,
                        AuditOutcome::Success,
                        false,
                        json!({"trace_id": request.trace_id}),
                    )
                    .await;
                GovernedResponse::new(
                    render_schema(&info),
                    QueryState::Responded,
                    AuditOutcome::Success,
                )
            }
            Err(e) => {
                tracing::error!(error = %e, resource = %resource, "schema_retrieval_error");
                self.audit
                    .log_access(
                        &request.user_id,
                        AuditAction::SchemaLookup,
                        &resource,
                        AuditOutcome::Error,
                        false,
                        json!({"error": e.to_string(), "trace_id": request.trace_id}),
                    )
                    .await;
                GovernedResponse::errored(
                    format!("Failed to retrieve schema: {}", e),
                    AuditOutcome::Error,
                )
            }
        }
    }

    async fn generate_sql(&self, request: &QueryRequest) -> Result<String> {
        let system = sql_generation_prompt(
            &self.settings.dataset_id,
            request.role,
            self.access.registry().fields(),
        );
        let messages = [ChatMessage::system(system), ChatMessage::user(request.text.as_str())];
        self.complete(&messages).await
    }

    async fn summarize(&self, request: &QueryRequest, sql: &str, rendered: &str) -> Result<String> {
        let messages = [
            ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
            ChatMessage::user(summary_prompt(&request.text, sql, rendered)),
        ];
        self.complete(&messages).await
    }

    /// One model call with exponential backoff between attempts.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.llm.chat(messages).await {
                Ok(response) => {
                    governance_metrics::track_tokens(
                        response.usage.prompt_tokens,
                        response.usage.completion_tokens,
                    );
                    return Ok(response.content);
                }
                Err(e) if attempt < self.settings.llm_retries => {
                    let backoff = self.settings.retry_base_backoff * 2u32.saturating_pow(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "LLM call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn execute(&self, statement: &SqlStatement) -> Result<QueryResult> {
        let timeout = self.settings.execution_timeout;
        let start = Instant::now();

        let rows = tokio::time::timeout(
            timeout,
            self.warehouse
                .execute(statement.text(), timeout, self.settings.max_rows),
        )
        .await
        .map_err(|_| {
            Error::timeout(format!("statement exceeded {} ms", timeout.as_millis()))
        })??;

        let execution_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        let result = QueryResult::new(rows, execution_time_ms);
        // Column names only; cell values are never inspected.
        let phi_fields: BTreeSet<String> = self
            .access
            .registry()
            .intersect(result.columns().iter().map(String::as_str));

        tracing::info!(
            rows = result.row_count(),
            execution_time_ms,
            phi_fields = ?phi_fields,
            "Statement executed"
        );
        Ok(result.with_phi_fields(phi_fields))
    }
}
