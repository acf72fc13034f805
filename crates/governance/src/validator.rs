//! Keyword denylist for mutating SQL.

use phi_query_core::{Error, Result};

/// Keywords that reject a statement wherever they appear.
pub const DESTRUCTIVE_KEYWORDS: [&str; 9] = [
    "DELETE", "DROP", "TRUNCATE", "UPDATE", "INSERT", "ALTER", "CREATE", "REPLACE", "MERGE",
];

/// Coarse textual filter run before any statement reaches the warehouse.
///
/// The scan is a case-insensitive substring match with no SQL parsing, so it
/// fails closed: a column such as `update_count` or a string literal
/// containing `drop` is rejected along with real mutations. It does not
/// replace read-only credentials on the warehouse side.
#[derive(Debug, Clone)]
pub struct QueryValidator {
    keywords: Vec<String>,
}

impl QueryValidator {
    pub fn new() -> Self {
        Self {
            keywords: DESTRUCTIVE_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Add a keyword to the denylist.
    pub fn deny_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.push(keyword.into().to_uppercase());
        self
    }

    /// First denylisted keyword found in `sql`, if any.
    pub fn find_keyword(&self, sql: &str) -> Option<&str> {
        let upper = sql.to_uppercase();
        self.keywords
            .iter()
            .find(|k| upper.contains(k.as_str()))
            .map(String::as_str)
    }

    /// Whether `sql` may be sent to the warehouse.
    pub fn validate(&self, sql: &str) -> bool {
        self.check(sql).is_ok()
    }

    /// Like [`validate`](Self::validate), naming the reason on rejection.
    pub fn check(&self, sql: &str) -> Result<()> {
        if sql.trim().is_empty() {
            tracing::warn!("Empty statement rejected");
            return Err(Error::validation_rejected("statement is empty"));
        }

        if let Some(keyword) = self.find_keyword(sql) {
            tracing::warn!(keyword = keyword, "destructive_query_blocked");
            return Err(Error::validation_rejected(format!(
                "statement contains denied keyword {}",
                keyword
            )));
        }

        Ok(())
    }
}

impl Default for QueryValidator {
    fn default() -> Self {
        Self::new()
    }
}
