//! The `drillcheck compare` command.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::Value;

use drillcheck_core::compare::{compare_rows, CompareOptions};
use drillcheck_core::model::{OrderingKey, Row};

pub fn execute(
    expected_path: PathBuf,
    actual_path: PathBuf,
    order_by: Option<String>,
    columns: Option<String>,
    tolerance: Option<f64>,
) -> Result<()> {
    let (expected_columns, expected) = load_rows(&expected_path)?;
    let (actual_columns, actual) = load_rows(&actual_path)?;

    let mut options = CompareOptions::default();
    if let Some(tolerance) = tolerance {
        if !tolerance.is_finite() || tolerance < 0.0 {
            bail!("--tolerance must be a non-negative number");
        }
        options = options.with_tolerance(tolerance);
    }
    if let Some(keys) = order_by {
        let ordering = keys
            .split(',')
            .map(|key| key.parse::<OrderingKey>().map_err(anyhow::Error::msg))
            .collect::<Result<Vec<_>>>()?;
        options = options.with_ordering(ordering);
    }
    let columns = match columns {
        Some(list) => list.split(',').map(|c| c.trim().to_string()).collect(),
        None if !actual_columns.is_empty() => actual_columns,
        None => expected_columns,
    };
    options = options.with_columns(columns);

    let verdict = compare_rows(&expected, &actual, &options);
    println!("{}", verdict.message);
    if !verdict.is_correct {
        std::process::exit(1);
    }
    Ok(())
}

/// Read rows from JSON: an array of arrays, an array of objects, or an
/// object with `columns` and `rows`. Returns the column names when known.
fn load_rows(path: &Path) -> Result<(Vec<String>, Vec<Row>)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    rows_from_value(value).with_context(|| format!("unsupported row format in {}", path.display()))
}

fn rows_from_value(value: Value) -> Result<(Vec<String>, Vec<Row>)> {
    match value {
        Value::Object(mut obj) => {
            let columns: Vec<String> = match obj.remove("columns") {
                Some(cols) => serde_json::from_value(cols).context("columns must be strings")?,
                None => Vec::new(),
            };
            let Some(rows) = obj.remove("rows") else {
                bail!("object input needs a \"rows\" field");
            };
            let (_, rows) = rows_from_value(rows)?;
            Ok((columns, rows))
        }
        Value::Array(items) => {
            let columns: Vec<String> = match items.first() {
                Some(Value::Object(first)) => first.keys().cloned().collect(),
                _ => Vec::new(),
            };
            let rows = items
                .into_iter()
                .enumerate()
                .map(|(i, item)| match item {
                    Value::Array(cells) => Ok(cells),
                    Value::Object(obj) => Ok(columns
                        .iter()
                        .map(|c| obj.get(c).cloned().unwrap_or(Value::Null))
                        .collect()),
                    other => bail!("row {} is not an array or object: {other}", i + 1),
                })
                .collect::<Result<Vec<Row>>>()?;
            Ok((columns, rows))
        }
        other => bail!("expected an array or object, found {other}"),
    }
}
