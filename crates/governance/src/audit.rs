//! Append-only audit trail for compliance.
//!
//! Every access or query attempt becomes one [`AuditEvent`]. Events are
//! written through an [`AuditSink`]; the [`AuditTrail`] front end never
//! surfaces sink failures to business logic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phi_query_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;

use crate::privacy::redact_metadata;

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    Started,
    Success,
    Denied,
    Error,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Started => "STARTED",
            AuditOutcome::Success => "SUCCESS",
            AuditOutcome::Denied => "DENIED",
            AuditOutcome::Error => "ERROR",
        }
    }

    /// Whether this outcome closes a request.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AuditOutcome::Started)
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action tag of an audit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuditAction {
    AgentQuery,
    QueryValidate,
    QueryExecute,
    SchemaLookup,
    PhiAccess,
    Custom(String),
}

impl AuditAction {
    pub fn as_str(&self) -> &str {
        match self {
            AuditAction::AgentQuery => "AGENT_QUERY",
            AuditAction::QueryValidate => "QUERY_VALIDATE",
            AuditAction::QueryExecute => "QUERY_EXECUTE",
            AuditAction::SchemaLookup => "SCHEMA_LOOKUP",
            AuditAction::PhiAccess => "PHI_ACCESS",
            AuditAction::Custom(tag) => tag,
        }
    }
}

impl From<String> for AuditAction {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "AGENT_QUERY" => AuditAction::AgentQuery,
            "QUERY_VALIDATE" => AuditAction::QueryValidate,
            "QUERY_EXECUTE" => AuditAction::QueryExecute,
            "SCHEMA_LOOKUP" => AuditAction::SchemaLookup,
            "PHI_ACCESS" => AuditAction::PhiAccess,
            _ => AuditAction::Custom(tag),
        }
    }
}

impl From<AuditAction> for String {
    fn from(action: AuditAction) -> Self {
        action.as_str().to_string()
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID.
    pub id: String,
    /// UTC timestamp (RFC 3339).
    pub timestamp: DateTime<Utc>,
    /// Requester identity.
    pub user_id: String,
    pub action: AuditAction,
    /// Resource touched (e.g. "warehouse", "patient_record:42").
    pub resource: String,
    #[serde(rename = "result")]
    pub outcome: AuditOutcome,
    pub phi_accessed: bool,
    pub metadata: Map<String, Value>,
    /// Always "audit".
    pub event_type: String,
}

impl AuditEvent {
    pub fn new(
        user_id: impl Into<String>,
        action: AuditAction,
        resource: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            user_id: user_id.into(),
            action,
            resource: resource.into(),
            outcome,
            phi_accessed: false,
            metadata: Map::new(),
            event_type: "audit".to_string(),
        }
    }

    /// Terminal SUCCESS event for an executed statement.
    pub fn query_executed(
        user_id: impl Into<String>,
        query_hash: &str,
        result_count: usize,
        execution_time_ms: f64,
        phi_fields_accessed: &[String],
    ) -> Self {
        Self::new(user_id, AuditAction::QueryExecute, "warehouse", AuditOutcome::Success)
            .with_phi_accessed(!phi_fields_accessed.is_empty())
            .with_metadata("query_hash", query_hash)
            .with_metadata("result_count", result_count)
            .with_metadata("execution_time_ms", execution_time_ms)
            .with_metadata("phi_fields", phi_fields_accessed)
    }

    pub fn with_phi_accessed(mut self, phi_accessed: bool) -> Self {
        self.phi_accessed = phi_accessed;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.metadata.insert(key.into(), value);
        self
    }

    /// Merge a JSON object into the metadata. Non-object values land under `value`.
    pub fn with_metadata_value(mut self, metadata: Value) -> Self {
        match metadata {
            Value::Object(map) => self.metadata.extend(map),
            Value::Null => {}
            other => {
                self.metadata.insert("value".to_string(), other);
            }
        }
        self
    }
}

/// Filter for querying audit events.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub user_id: Option<String>,
    pub action: Option<AuditAction>,
    pub outcome: Option<AuditOutcome>,
    pub phi_only: bool,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.user_id.as_ref().map_or(true, |u| &event.user_id == u)
            && self.action.as_ref().map_or(true, |a| &event.action == a)
            && self.outcome.map_or(true, |o| event.outcome == o)
            && (!self.phi_only || event.phi_accessed)
    }

    fn apply(&self, events: impl Iterator<Item = AuditEvent>) -> Vec<AuditEvent> {
        let matched = events.filter(|e| self.matches(e));
        match self.limit {
            Some(limit) => matched.take(limit).collect(),
            None => matched.collect(),
        }
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// Destination for audit events. Append-only: sinks never update or delete.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one event.
    async fn record(&self, event: &AuditEvent) -> Result<()>;

    /// Read events back in append order.
    async fn query(&self, _filter: AuditFilter) -> Result<Vec<AuditEvent>> {
        Err(Error::audit("this sink does not support queries"))
    }
}

/// In-memory audit sink for testing and embedding.
#[derive(Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEvent>> {
        let events = self.events.lock().unwrap();
        Ok(filter.apply(events.iter().cloned()))
    }
}

/// Writes each event as one structured record on the `audit` tracing target.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        let metadata = serde_json::to_string(&event.metadata)?;
        tracing::info!(
            target: "audit",
            event_id = %event.id,
            timestamp = %event.timestamp.to_rfc3339(),
            user_id = %event.user_id,
            action = %event.action,
            resource = %event.resource,
            result = %event.outcome,
            phi_accessed = event.phi_accessed,
            metadata = %metadata,
            event_type = %event.event_type,
            "audit_log"
        );
        Ok(())
    }
}

/// A line of the hash-chained audit file.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChainedRecord {
    pub event: AuditEvent,
    /// Hash of the previous record.
    pub prev_hash: String,
    /// SHA-256 over `prev_hash` and the serialized event.
    pub hash: String,
}

fn chain_hash(prev_hash: &str, event_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(event_json.as_bytes());
    hex::encode(hasher.finalize())
}

fn genesis_hash() -> String {
    "0".repeat(64)
}

/// Tamper-evident audit sink writing JSON lines to an append-only file.
pub struct JsonlAuditSink {
    path: PathBuf,
    last_hash: tokio::sync::Mutex<String>,
}

impl JsonlAuditSink {
    /// Create or reopen the file at `path`, recovering the chain head.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut last_hash = genesis_hash();

        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| Error::audit(format!("Failed to read audit log: {}", e)))?;
            if let Some(line) = content.lines().rev().find(|l| !l.trim().is_empty()) {
                let record: ChainedRecord = serde_json::from_str(line)
                    .map_err(|e| Error::audit(format!("Failed to parse last audit record: {}", e)))?;
                last_hash = record.hash;
            }
        } else if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::audit(format!("Failed to create audit directory: {}", e)))?;
        }

        Ok(Self {
            path,
            last_hash: tokio::sync::Mutex::new(last_hash),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_records(&self) -> Result<Vec<ChainedRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::audit(format!("Failed to read audit log: {}", e))),
        };

        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                serde_json::from_str::<ChainedRecord>(l)
                    .map_err(|e| Error::audit(format!("Corrupt audit record: {}", e)))
            })
            .collect()
    }

    /// Recompute the hash chain. Returns the number of verified records.
    pub async fn verify_chain(&self) -> Result<usize> {
        let records = self.read_records().await?;
        let mut expected_prev = genesis_hash();

        for (index, record) in records.iter().enumerate() {
            let event_json = serde_json::to_string(&record.event)?;
            if record.prev_hash != expected_prev
                || record.hash != chain_hash(&record.prev_hash, &event_json)
            {
                return Err(Error::audit(format!(
                    "Audit chain broken at record {}",
                    index + 1
                )));
            }
            expected_prev = record.hash.clone();
        }

        Ok(records.len())
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        // Holding the head lock serializes appends and keeps the chain linear.
        let mut last_hash = self.last_hash.lock().await;

        let event_json = serde_json::to_string(event)?;
        let hash = chain_hash(&last_hash, &event_json);
        let record = ChainedRecord {
            event: event.clone(),
            prev_hash: last_hash.clone(),
            hash: hash.clone(),
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::audit(format!("Failed to open audit log: {}", e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::audit(format!("Failed to write audit record: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| Error::audit(format!("Failed to flush audit log: {}", e)))?;

        *last_hash = hash;
        Ok(())
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEvent>> {
        let records = self.read_records().await?;
        Ok(filter.apply(records.into_iter().map(|r| r.event)))
    }
}

/// Writes every event to each inner sink.
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AuditSink for FanoutAuditSink {
    /// All sinks are attempted; the first failure is returned.
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.record(event).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Answered by the first sink that supports queries.
    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEvent>> {
        for sink in &self.sinks {
            if let Ok(events) = sink.query(filter.clone()).await {
                return Ok(events);
            }
        }
        Err(Error::audit("no queryable sink configured"))
    }
}

// =============================================================================
// Trail
// =============================================================================

/// Front end used by the governor. Recording never fails from the caller's
/// point of view: sink errors are reported on the error log and counted.
#[derive(Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
    enabled: bool,
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink, enabled: true }
    }

    /// Turn recording off entirely. Only for non-compliant deployments.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Redact the metadata and append the event.
    pub async fn record(&self, event: AuditEvent) {
        let event_id = event.id.clone();
        let action = event.action.clone();
        if let Err(e) = self.record_checked(event).await {
            metrics::counter!("audit_failures_total").increment(1);
            tracing::error!(
                error = %e,
                event_id = %event_id,
                action = %action,
                "Failed to record audit event"
            );
        }
    }

    /// Same as [`record`](Self::record) but hands the sink error back. Used by
    /// health checks, never on the request path.
    pub async fn record_checked(&self, mut event: AuditEvent) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        if let Value::Object(map) = redact_metadata(&Value::Object(std::mem::take(&mut event.metadata))) {
            event.metadata = map;
        }

        self.sink.record(&event).await
    }

    /// Record an access to `resource`.
    pub async fn log_access(
        &self,
        user_id: &str,
        action: AuditAction,
        resource: &str,
        outcome: AuditOutcome,
        phi_accessed: bool,
        metadata: Value,
    ) {
        let event = AuditEvent::new(user_id, action, resource, outcome)
            .with_phi_accessed(phi_accessed)
            .with_metadata_value(metadata);
        self.record(event).await;
    }

    /// Record a successful statement execution against the warehouse.
    pub async fn log_query(
        &self,
        user_id: &str,
        query_hash: &str,
        result_count: usize,
        execution_time_ms: f64,
        phi_fields_accessed: &[String],
    ) {
        self.log_query_with(
            user_id,
            query_hash,
            result_count,
            execution_time_ms,
            phi_fields_accessed,
            Value::Null,
        )
        .await;
    }

    /// [`log_query`](Self::log_query) with extra metadata merged into the event.
    pub async fn log_query_with(
        &self,
        user_id: &str,
        query_hash: &str,
        result_count: usize,
        execution_time_ms: f64,
        phi_fields_accessed: &[String],
        metadata: Value,
    ) {
        let event = AuditEvent::query_executed(
            user_id,
            query_hash,
            result_count,
            execution_time_ms,
            phi_fields_accessed,
        )
        .with_metadata_value(metadata);
        self.record(event).await;
    }

    /// Record that PHI of one patient record was accessed.
    pub async fn log_phi_access(
        &self,
        user_id: &str,
        record_id: &str,
        fields_accessed: &[String],
        purpose: &str,
    ) {
        let event = AuditEvent::new(
            user_id,
            AuditAction::PhiAccess,
            format!("patient_record:{}", record_id),
            AuditOutcome::Success,
        )
        .with_phi_accessed(true)
        .with_metadata("fields_accessed", fields_accessed)
        .with_metadata("purpose", purpose);
        self.record(event).await;
    }

    /// Read events back from the sink.
    pub async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEvent>> {
        self.sink.query(filter).await
    }
}
