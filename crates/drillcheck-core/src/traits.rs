//! Collaborator traits for execution engines and persistence.
//!
//! The SQL and Python engines are implemented by the `drillcheck-runner`
//! crate. Engine failures are returned as `anyhow::Error` wrapping an
//! [`ExecutionError`](crate::error::ExecutionError) so callers can classify
//! them with `downcast_ref`.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{CapturedOutput, SchemaTable, SeedData, TabularResult};

static SQL_FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)```sql|```").unwrap());
static SQL_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(SELECT|WITH|PRAGMA|CREATE|DELETE|INSERT|UPDATE)\b").unwrap()
});

// ---------------------------------------------------------------------------
// SQL engine
// ---------------------------------------------------------------------------

/// Executes a query against freshly seeded tables.
#[async_trait]
pub trait SqlEngine: Send + Sync {
    /// Human-readable engine name (e.g. "sqlite3").
    fn name(&self) -> &str;

    /// Create the tables, insert the seed rows and run the query.
    async fn execute(&self, request: &SqlRequest) -> anyhow::Result<TabularResult>;
}

/// Request to run one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlRequest {
    /// Declared tables. When empty, tables are inferred from `data`.
    #[serde(default)]
    pub tables: Vec<SchemaTable>,
    /// Seed rows per table.
    #[serde(default)]
    pub data: SeedData,
    /// The submitted query.
    pub sql: String,
    /// Timeout in milliseconds.
    pub timeout_ms: u64,
}

// ---------------------------------------------------------------------------
// Python engine
// ---------------------------------------------------------------------------

/// Runs a Python submission and captures its standard output.
#[async_trait]
pub trait PythonEngine: Send + Sync {
    /// Human-readable engine name (e.g. "python3").
    fn name(&self) -> &str;

    /// Run the code with the optional fixture bound to `raw_data`.
    async fn run(&self, request: &PythonRequest) -> anyhow::Result<CapturedOutput>;
}

/// Request to run one script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PythonRequest {
    /// The submitted source code.
    pub code: String,
    /// JSON fixture exposed to the script as `raw_data`.
    #[serde(default)]
    pub data: Option<Value>,
    /// Timeout in milliseconds.
    pub timeout_ms: u64,
}

// ---------------------------------------------------------------------------
// Key-value store
// ---------------------------------------------------------------------------

/// String key-value persistence injected into stateful helpers.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;

    fn delete(&self, key: &str) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Submission cleanup
// ---------------------------------------------------------------------------

/// Strip markdown fences and leading narration from a SQL submission.
///
/// Everything before the first line that starts with a statement keyword is
/// dropped. Text without such a line is returned with fences removed.
pub fn extract_sql(text: &str) -> String {
    let unfenced = SQL_FENCE.replace_all(text.trim(), "");
    let lines: Vec<&str> = unfenced.split('\n').collect();
    match lines.iter().position(|l| SQL_START.is_match(l.trim())) {
        Some(start) => lines[start..].join("\n").trim().to_string(),
        None => unfenced.trim().to_string(),
    }
}
