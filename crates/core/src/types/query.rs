use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

// =============================================================================
// SQL Statement
// =============================================================================

/// SHA-256 of the exact bytes, as lowercase hex.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// A SQL statement together with its content hash.
///
/// The hash is the audit correlation key and is stable for the exact text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlStatement {
    text: String,
    hash: String,
}

impl SqlStatement {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let hash = content_hash(&text);
        Self { text, hash }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl fmt::Display for SqlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// =============================================================================
// Rows
// =============================================================================

/// A single cell returned by the warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Null,
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::String(s) => f.write_str(s),
            CellValue::Integer(i) => write!(f, "{}", i),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Boolean(b) => write!(f, "{}", b),
            CellValue::Timestamp(ts) => f.write_str(&ts.to_rfc3339()),
            CellValue::Null => f.write_str("None"),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::String(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::String(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Integer(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Float(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Boolean(value)
    }
}

impl From<DateTime<Utc>> for CellValue {
    fn from(value: DateTime<Utc>) -> Self {
        CellValue::Timestamp(value)
    }
}

/// One result row: column name to value, in the order the warehouse returned them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    cells: Vec<(String, CellValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column. A repeated column name replaces the earlier value in place.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<CellValue>) {
        let column = column.into();
        let value = value.into();
        match self.cells.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.cells.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.cells.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

// =============================================================================
// Query Result
// =============================================================================

/// Rows returned for an executed statement plus what governance learned about them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    /// Ordered rows.
    pub rows: Vec<Row>,
    /// Wall-clock execution latency in milliseconds.
    pub execution_time_ms: f64,
    /// Result columns that are registered PHI fields.
    pub phi_fields: BTreeSet<String>,
}

impl QueryResult {
    pub fn new(rows: Vec<Row>, execution_time_ms: f64) -> Self {
        Self {
            rows,
            execution_time_ms,
            phi_fields: BTreeSet::new(),
        }
    }

    pub fn with_phi_fields(mut self, phi_fields: BTreeSet<String>) -> Self {
        self.phi_fields = phi_fields;
        self
    }

    /// Union of column names across all rows.
    pub fn columns(&self) -> BTreeSet<String> {
        self.rows
            .iter()
            .flat_map(|row| row.columns().map(str::to_string))
            .collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn touches_phi(&self) -> bool {
        !self.phi_fields.is_empty()
    }
}
