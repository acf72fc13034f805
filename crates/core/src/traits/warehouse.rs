//! Warehouse collaborator.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::types::{Row, SchemaInfo};

/// Tabular data warehouse.
///
/// Implementations own their transport, retries and credentials. They must be
/// safe to share between in-flight requests; a client that is not should
/// serialize access internally.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Run a statement and return at most `max_rows` rows in warehouse order.
    async fn execute(&self, sql: &str, timeout: Duration, max_rows: usize) -> Result<Vec<Row>>;

    /// List the tables of `dataset`, or describe one table when `table` is given.
    async fn describe(&self, dataset: &str, table: Option<&str>) -> Result<SchemaInfo>;

    /// Check connectivity.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
