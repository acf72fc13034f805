//! Mock implementations of the collaborator traits for testing.
//!
//! Both mocks are scripted up front and record every call so tests can
//! assert on what the governor actually sent.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

use crate::{
    traits::{ChatMessage, LlmClient, LlmResponse, LlmUsage, Warehouse},
    types::{Row, SchemaInfo},
    Error, Result,
};

// =============================================================================
// Mock LLM Client
// =============================================================================

/// Scripted mock LLM that returns predefined responses in order, cycling
/// when the script runs out.
pub struct MockLlm {
    responses: Mutex<Vec<String>>,
    failures_remaining: Mutex<usize>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockLlm {
    /// Create a new mock LLM with a queue of responses.
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses),
            failures_remaining: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that always returns the same response.
    pub fn constant(response: &str) -> Self {
        Self::new(vec![response.to_string()])
    }

    /// Fail the first `count` calls with a provider error before answering.
    pub fn failing_first(self, count: usize) -> Self {
        *self.failures_remaining.lock().unwrap() = count;
        self
    }

    /// Get the number of calls made to this mock.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Messages sent on each call, oldest first.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<LlmResponse> {
        let call_index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(messages.to_vec());
            calls.len() - 1
        };

        {
            let mut failures = self.failures_remaining.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::model_provider("mock provider unavailable"));
            }
        }

        let responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(Error::model_provider("mock has no scripted responses"));
        }
        let content = responses[call_index % responses.len()].clone();

        Ok(LlmResponse {
            content,
            finish_reason: "stop".to_string(),
            usage: LlmUsage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
            },
        })
    }
}

// =============================================================================
// Mock Warehouse
// =============================================================================

#[derive(Debug, Clone)]
enum ScriptedFault {
    Warehouse(String),
    Timeout(String),
}

/// Scripted warehouse that returns fixed rows or a fixed fault.
#[derive(Default)]
pub struct MockWarehouse {
    rows: Vec<Row>,
    fault: Option<ScriptedFault>,
    delay: Option<Duration>,
    schemas: Vec<SchemaInfo>,
    executed: Mutex<Vec<String>>,
    described: Mutex<Vec<(String, Option<String>)>>,
}

impl MockWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return these rows for every statement.
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Fail every statement with a warehouse error.
    pub fn failing(message: &str) -> Self {
        Self {
            fault: Some(ScriptedFault::Warehouse(message.to_string())),
            ..Self::default()
        }
    }

    /// Fail every statement with a timeout raised by the client itself.
    pub fn timing_out(message: &str) -> Self {
        Self {
            fault: Some(ScriptedFault::Timeout(message.to_string())),
            ..Self::default()
        }
    }

    /// Sleep before answering, to exercise caller-side timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Register schema answers for `describe`.
    pub fn with_schema(mut self, schema: SchemaInfo) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Number of `execute` calls made.
    pub fn execute_count(&self) -> usize {
        self.executed.lock().unwrap().len()
    }

    /// Statements received by `execute`, oldest first.
    pub fn executed_sql(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// Arguments received by `describe`, oldest first.
    pub fn describe_calls(&self) -> Vec<(String, Option<String>)> {
        self.described.lock().unwrap().clone()
    }
}

#[async_trait]
impl Warehouse for MockWarehouse {
    async fn execute(&self, sql: &str, _timeout: Duration, max_rows: usize) -> Result<Vec<Row>> {
        self.executed.lock().unwrap().push(sql.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.fault {
            Some(ScriptedFault::Warehouse(msg)) => Err(Error::warehouse(msg.clone())),
            Some(ScriptedFault::Timeout(msg)) => Err(Error::timeout(msg.clone())),
            None => Ok(self.rows.iter().take(max_rows).cloned().collect()),
        }
    }

    async fn describe(&self, dataset: &str, table: Option<&str>) -> Result<SchemaInfo> {
        self.described
            .lock()
            .unwrap()
            .push((dataset.to_string(), table.map(str::to_string)));

        if let Some(ScriptedFault::Warehouse(msg)) = &self.fault {
            return Err(Error::warehouse(msg.clone()));
        }

        match table {
            Some(name) => self
                .schemas
                .iter()
                .find(|s| matches!(s, SchemaInfo::Table { table, .. } if table == name))
                .cloned()
                .ok_or_else(|| Error::warehouse(format!("Not found: Table {}.{}", dataset, name))),
            None => Ok(self
                .schemas
                .iter()
                .find(|s| matches!(s, SchemaInfo::Tables { .. }))
                .cloned()
                .unwrap_or_else(|| SchemaInfo::Tables {
                    dataset: dataset.to_string(),
                    tables: Vec::new(),
                })),
        }
    }
}
