//! SQL engine backed by the `sqlite3` command-line shell.
//!
//! Each query runs against a fresh database file in its own sandbox: tables
//! are created from the declared DDL (or inferred from the seed rows), the
//! seed rows inserted, and the query's JSON output parsed back into rows.
//! The shell runs with `-safe` and submissions may not contain dot-commands.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde_json::{Map, Value};

use drillcheck_core::error::ExecutionError;
use drillcheck_core::model::{with_inferred_tables, Row, TabularResult};
use drillcheck_core::traits::{extract_sql, SqlEngine, SqlRequest};

use crate::sandbox::{last_stderr_line, Sandbox};

/// Timeout used when a request carries none.
pub const DEFAULT_SQL_TIMEOUT_MS: u64 = 5000;

/// Runs queries through `sqlite3 -safe -bail -json`.
pub struct SqliteCliEngine {
    binary: String,
}

impl Default for SqliteCliEngine {
    fn default() -> Self {
        Self::new("sqlite3")
    }
}

impl SqliteCliEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }
}

#[async_trait]
impl SqlEngine for SqliteCliEngine {
    fn name(&self) -> &str {
        "sqlite3"
    }

    async fn execute(&self, request: &SqlRequest) -> Result<TabularResult> {
        let timeout_ms = if request.timeout_ms > 0 {
            request.timeout_ms
        } else {
            DEFAULT_SQL_TIMEOUT_MS
        };
        check_dot_commands(&extract_sql(&request.sql))?;
        let sandbox = Sandbox::new(Duration::from_millis(timeout_ms))?;
        let script = build_script(request);
        tracing::debug!(bytes = script.len(), "running sqlite3 script");

        let output = sandbox
            .run(&self.binary, &["-safe", "-bail", "-json", "challenge.db"], Some(&script))
            .await?;

        if !output.status.success() {
            return Err(classify_error(&output.stderr).into());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_json_output(&stdout)
    }
}

/// Reject shell dot-commands (`.shell`, `.output`, `.read`, ...).
pub fn check_dot_commands(query: &str) -> Result<(), ExecutionError> {
    match query.lines().map(str::trim_start).find(|l| l.starts_with('.')) {
        Some(line) => {
            let command = line.split_whitespace().next().unwrap_or(line);
            Err(ExecutionError::Forbidden(format!(
                "sqlite3 dot-command {command} is not allowed"
            )))
        }
        None => Ok(()),
    }
}

/// DDL, seed INSERTs and the cleaned query as one script.
pub fn build_script(request: &SqlRequest) -> String {
    let mut script = String::new();
    for table in with_inferred_tables(request.tables.clone(), &request.data) {
        script.push_str(&table.to_ddl());
        script.push('\n');
    }
    for (table, rows) in &request.data {
        for row in rows {
            if let Some(insert) = insert_statement(table, row) {
                script.push_str(&insert);
                script.push('\n');
            }
        }
    }

    let query = extract_sql(&request.sql);
    script.push_str(query.trim_end());
    if !query.trim_end().ends_with(';') {
        script.push(';');
    }
    script.push('\n');
    script
}

fn insert_statement(table: &str, row: &Map<String, Value>) -> Option<String> {
    if row.is_empty() {
        return None;
    }
    let columns: Vec<&str> = row.keys().map(String::as_str).collect();
    let values: Vec<String> = row.values().map(sql_literal).collect();
    Some(format!(
        "INSERT INTO {table} ({}) VALUES ({});",
        columns.join(", "),
        values.join(", ")
    ))
}

/// Render a JSON value as a SQL literal.
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        other => quote(&other.to_string()),
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Map sqlite3's stderr to a submission error.
fn classify_error(stderr: &[u8]) -> ExecutionError {
    let line = last_stderr_line(stderr);
    let message = line
        .strip_prefix("Error: ")
        .unwrap_or(&line)
        .to_string();
    let lower = message.to_lowercase();
    if lower.contains("syntax error") || lower.contains("incomplete input") || lower.starts_with("parse error") {
        ExecutionError::Syntax(message)
    } else {
        ExecutionError::Runtime(message)
    }
}

/// One `-json` row with its key/value pairs in output order.
///
/// `sqlite3` repeats keys when a result has duplicate column names, which a
/// JSON map would collapse.
struct OrderedRow(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for OrderedRow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = OrderedRow;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<OrderedRow, A::Error> {
                let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(pair) = map.next_entry::<String, Value>()? {
                    pairs.push(pair);
                }
                Ok(OrderedRow(pairs))
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}

/// Parse `-json` output, keeping the last result set.
///
/// Statements that return no rows print nothing, so an empty output is an
/// empty result with no known columns.
pub fn parse_json_output(stdout: &str) -> Result<TabularResult> {
    let mut last: Option<Vec<OrderedRow>> = None;
    for rows in serde_json::Deserializer::from_str(stdout).into_iter::<Vec<OrderedRow>>() {
        last = Some(rows.context("malformed sqlite3 JSON output")?);
    }
    let objects = last.unwrap_or_default();

    let columns: Vec<String> = match objects.first() {
        Some(first) => first.0.iter().map(|(k, _)| k.clone()).collect(),
        None => Vec::new(),
    };
    let rows: Vec<Row> = objects
        .into_iter()
        .map(|row| row.0.into_iter().map(|(_, v)| v).collect())
        .collect();

    Ok(TabularResult { columns, rows })
}
