//! Result formatting
//!
//! Turns Graph payloads and errors into the text handed back to MCP
//! clients. Everything here is pure: same input, same output, no I/O.

use crate::graph::error::GraphError;
use serde_json::Value;

/// Returned for a successful call that matched nothing
pub const NO_RESULTS: &str = "No results found.";

/// Prefix of every rendered failure
pub const ERROR_MARKER: &str = "Error:";

pub const DEFAULT_MAX_ROWS: usize = 100;

/// Records to render, with paging metadata
#[derive(Debug, Clone)]
pub struct ResultSet<'a> {
    pub items: &'a [Value],
    /// Plural noun used in the header, e.g. "results" or "users"
    pub noun: &'a str,
    pub total_count: Option<i64>,
    pub complete: bool,
    pub pages: usize,
    pub max_rows: usize,
}

impl<'a> ResultSet<'a> {
    pub fn new(items: &'a [Value]) -> Self {
        Self {
            items,
            noun: "results",
            total_count: None,
            complete: true,
            pages: 1,
            max_rows: DEFAULT_MAX_ROWS,
        }
    }

    pub fn noun(mut self, noun: &'a str) -> Self {
        self.noun = noun;
        self
    }

    pub fn total_count(mut self, total: Option<i64>) -> Self {
        self.total_count = total;
        self
    }

    pub fn incomplete_after(mut self, pages: usize) -> Self {
        self.complete = false;
        self.pages = pages;
        self
    }

    pub fn max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }
}

/// Render a record sequence
pub fn format_records(set: &ResultSet<'_>) -> String {
    if set.items.is_empty() {
        return NO_RESULTS.to_string();
    }

    let mut lines = Vec::with_capacity(set.items.len().min(set.max_rows) + 4);
    lines.push(format!("Found {} {}:", set.items.len(), set.noun));
    if let Some(total) = set.total_count {
        lines.push(format!("Total count: {}", total));
    }
    lines.push(String::new());

    for record in set.items.iter().take(set.max_rows) {
        lines.push(serde_json::to_string(record).unwrap_or_else(|_| record.to_string()));
    }

    if set.items.len() > set.max_rows {
        lines.push(String::new());
        lines.push(format!(
            "... and {} more rows",
            set.items.len() - set.max_rows
        ));
    }

    if !set.complete {
        lines.push(String::new());
        lines.push(format!(
            "(incomplete: stopped after {} pages; more results are available)",
            set.pages
        ));
    }

    lines.join("\n")
}

/// Render a single directory object as `key: value` lines
pub fn format_user(user: &Value) -> String {
    let mut lines = vec!["User Profile:".to_string(), "-".repeat(40)];

    match user {
        Value::Object(map) => {
            for (key, value) in map {
                if value.is_null() || key.starts_with('@') {
                    continue;
                }
                lines.push(format!("{}: {}", key, display_value(value)));
            }
        }
        other => lines.push(display_value(other)),
    }

    lines.join("\n")
}

/// Render a failure; never fails itself
pub fn format_error(error: &GraphError) -> String {
    format!("{} {}: {}", ERROR_MARKER, error.kind(), error)
}

/// Strings without JSON quotes, everything else as compact JSON
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
