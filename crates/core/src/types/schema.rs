use serde::{Deserialize, Serialize};

/// One column of a warehouse table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: String,
    /// NULLABLE, REQUIRED or REPEATED.
    pub mode: String,
    pub description: Option<String>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            mode: "NULLABLE".to_string(),
            description: None,
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Result of a schema lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaInfo {
    /// Tables available in a dataset.
    Tables { dataset: String, tables: Vec<String> },
    /// Column listing for one table.
    Table { table: String, fields: Vec<FieldSchema> },
}
