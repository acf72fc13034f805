//! Keyword routing between schema lookups and data queries.

/// What the requester is asking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// List the dataset's tables, or describe one table.
    Metadata { table: Option<String> },
    /// Anything else goes through SQL generation.
    Query,
}

const SUBJECT_WORDS: [&str; 2] = ["table", "schema"];
const ASK_WORDS: [&str; 5] = ["what", "show", "list", "available", "describe"];
const ARTICLES: [&str; 3] = ["the", "a", "an"];

/// Classify `text` with simple keyword heuristics.
///
/// A metadata request mentions a table or schema together with an asking
/// word. The table name, when one is given, is the word following `for` or
/// `of` in a schema or describe request.
pub fn route_intent(text: &str) -> Intent {
    let lower = text.to_lowercase();
    let is_metadata = SUBJECT_WORDS.iter().any(|w| lower.contains(w))
        && ASK_WORDS.iter().any(|w| lower.contains(w));
    if !is_metadata {
        return Intent::Query;
    }

    let table = if lower.contains("schema") || lower.contains("describe") {
        table_name(text)
    } else {
        None
    };
    Intent::Metadata { table }
}

fn table_name(text: &str) -> Option<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let position = words
        .iter()
        .position(|w| matches!(w.to_lowercase().as_str(), "for" | "of"))?;

    words[position + 1..]
        .iter()
        .map(|w| w.trim_matches(|c| matches!(c, '?' | '.' | ',' | '\'' | '"' | '`')))
        .find(|w| {
            !w.is_empty()
                && !w.eq_ignore_ascii_case("table")
                && !ARTICLES.contains(&w.to_lowercase().as_str())
        })
        .map(str::to_string)
}
