//! Human-readable rendering of query results and schema listings.

use std::fmt::Write;

use phi_query_core::{QueryResult, SchemaInfo};

/// Turns a result set into response text.
pub trait ResultRenderer: Send + Sync {
    /// Render at most `display_rows` rows of `result`.
    fn render(&self, result: &QueryResult, display_rows: usize) -> String;
}

/// Plain text listing, one block per row.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextRenderer;

impl ResultRenderer for TextRenderer {
    fn render(&self, result: &QueryResult, display_rows: usize) -> String {
        if result.rows.is_empty() {
            return "Query executed successfully. No results found.".to_string();
        }

        let shown = result.rows.len().min(display_rows);
        let mut text = format!(
            "Found {} results. Showing first {}:\n\n",
            result.rows.len(),
            shown
        );
        for (i, row) in result.rows.iter().take(shown).enumerate() {
            let _ = writeln!(text, "Row {}:", i + 1);
            for (column, value) in row.iter() {
                let _ = writeln!(text, "  {}: {}", column, value);
            }
            text.push('\n');
        }
        text
    }
}

/// Render a schema lookup answer.
pub fn render_schema(info: &SchemaInfo) -> String {
    match info {
        SchemaInfo::Tables { dataset, tables } if tables.is_empty() => {
            format!("No tables found in dataset '{}'", dataset)
        }
        SchemaInfo::Tables { dataset, tables } => {
            let mut text = format!("Tables in dataset '{}':\n\n", dataset);
            for table in tables {
                let _ = writeln!(text, "  - {}", table);
            }
            text.push_str("\nAsk me for schema of a specific table to see details.");
            text
        }
        SchemaInfo::Table { table, fields } => {
            let mut text = format!("Schema for table '{}':\n\n", table);
            for field in fields {
                let _ = write!(text, "  {}: {}", field.name, field.field_type);
                if field.mode != "NULLABLE" {
                    let _ = write!(text, " ({})", field.mode);
                }
                if let Some(description) = &field.description {
                    let _ = write!(text, " - {}", description);
                }
                text.push('\n');
            }
            text
        }
    }
}
