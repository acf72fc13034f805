//! Prompts sent to the model and parsing of its SQL replies.

use phi_query_core::Role;

/// System prompt for the result summary call.
pub const SUMMARY_SYSTEM_PROMPT: &str =
    "You are explaining query results to a user. Be concise and helpful.";

/// Fixed policy preamble for SQL generation.
pub fn sql_generation_prompt(dataset: &str, role: Role, phi_fields: &[String]) -> String {
    format!(
        r#"You are a SQL query generator for the analytics warehouse.

Dataset: {dataset}
User role: {role}

RULES:
1. Generate ONLY SELECT queries (read-only)
2. Never use DELETE, UPDATE, DROP, INSERT, ALTER, CREATE
3. Always use LIMIT clause (default LIMIT 100)
4. Be mindful of PHI fields: {phi}
5. Return ONLY the SQL query, no explanation

Generate a safe SELECT query for the user's request."#,
        phi = phi_fields.join(", ")
    )
}

/// User message for the result summary call.
pub fn summary_prompt(user_text: &str, sql: &str, results: &str) -> String {
    format!(
        "User asked: {user_text}\n\nSQL Query: {sql}\n\nResults: {results}\n\nProvide a natural language summary:"
    )
}

/// Pull the statement out of a model reply.
///
/// When the reply contains a fenced block the first one is used and a leading
/// `sql` language tag is dropped. The result is trimmed and may be empty.
pub fn extract_sql(reply: &str) -> String {
    let reply = reply.trim();
    if !reply.contains("```") {
        return reply.to_string();
    }

    let block = reply.split("```").nth(1).unwrap_or_default();
    let block = block
        .strip_prefix("sql")
        .or_else(|| block.strip_prefix("SQL"))
        .unwrap_or(block);
    block.trim().to_string()
}
