//! Comparison of produced results against expected ones.
//!
//! Tabular comparison is tolerant of float noise and, unless an ordering is
//! required, of row order. Output comparison handles whitespace and line
//! ending differences, or matches a regex. Mismatches are verdicts, never
//! errors.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{OrderingKey, Row, SortDirection, TabularResult};

/// Absolute tolerance used when none is configured.
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

/// Magnitudes below this are treated as zero.
const ZERO_SNAP: f64 = 1e-12;

static NUMERIC_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+(\.\d+)?$").unwrap());
static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Pass/fail outcome with a message for the learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonVerdict {
    pub is_correct: bool,
    pub message: String,
}

impl ComparisonVerdict {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            is_correct: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            is_correct: false,
            message: message.into(),
        }
    }
}

/// Settings for tabular comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct CompareOptions {
    /// Maximum absolute difference between numbers considered equal.
    pub tolerance: f64,
    /// Required ordering. Empty means rows may come in any order.
    pub ordering: Vec<OrderingKey>,
    /// Column names used to resolve ordering keys given by name.
    pub columns: Vec<String>,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            ordering: Vec::new(),
            columns: Vec::new(),
        }
    }
}

impl CompareOptions {
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_ordering(mut self, ordering: Vec<OrderingKey>) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }
}

// ---------------------------------------------------------------------------
// Cells
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Null,
    Number(f64),
    Text(String),
}

impl Cell {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Cell::Null,
            Value::Number(n) => n.as_f64().map(normalize_number).map_or_else(
                || Cell::Text(n.to_string()),
                Cell::Number,
            ),
            Value::String(s) if NUMERIC_TEXT.is_match(s.trim()) => match s.trim().parse::<f64>() {
                Ok(v) => Cell::Number(normalize_number(v)),
                Err(_) => Cell::Text(s.trim().to_string()),
            },
            Value::String(s) => Cell::Text(s.trim().to_string()),
            Value::Bool(b) => Cell::Text(b.to_string()),
            other => Cell::Text(other.to_string()),
        }
    }

    fn text(&self) -> Option<&str> {
        match self {
            Cell::Null => Some("null"),
            Cell::Text(s) => Some(s),
            Cell::Number(_) => None,
        }
    }

    fn equals(&self, other: &Cell, tolerance: f64) -> bool {
        match (self, other) {
            (Cell::Number(a), Cell::Number(b)) => (a - b).abs() <= tolerance,
            (Cell::Number(_), _) | (_, Cell::Number(_)) => false,
            _ => self.text() == other.text(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Cell::Null => 0,
            Cell::Number(_) => 1,
            Cell::Text(_) => 2,
        }
    }

    fn sort_cmp(&self, other: &Cell) -> Ordering {
        match (self, other) {
            (Cell::Number(a), Cell::Number(b)) => a.total_cmp(b),
            (Cell::Text(a), Cell::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    /// Hashable key; numbers are already rounded to 12 decimals.
    fn key(&self) -> String {
        match self {
            Cell::Null => "s:null".to_string(),
            Cell::Text(s) => format!("s:{s}"),
            Cell::Number(v) => {
                let mut formatted = format!("{v:.12}");
                if formatted.starts_with('-') && formatted[1..].chars().all(|c| c == '0' || c == '.')
                {
                    formatted.remove(0);
                }
                format!("n:{formatted}")
            }
        }
    }
}

/// Snap near-zero values to zero and round to 12 decimals.
pub fn normalize_number(v: f64) -> f64 {
    if v.abs() < ZERO_SNAP {
        return 0.0;
    }
    format!("{v:.12}").parse().unwrap_or(v)
}

fn cells(row: &Row) -> Vec<Cell> {
    row.iter().map(Cell::from_value).collect()
}

fn row_key(row: &[Cell]) -> String {
    row.iter()
        .map(Cell::key)
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

fn display_row(row: &Row) -> String {
    serde_json::to_string(row).unwrap_or_else(|_| format!("{row:?}"))
}

fn display_value(value: Option<&Value>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "nothing".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tabular comparison
// ---------------------------------------------------------------------------

/// Compare result rows against expected rows.
pub fn compare_rows(expected: &[Row], actual: &[Row], options: &CompareOptions) -> ComparisonVerdict {
    if options.ordering.is_empty() {
        compare_unordered(expected, actual, options.tolerance)
    } else {
        compare_ordered(expected, actual, options)
    }
}

/// Compare an engine result, resolving ordering keys against its columns.
pub fn compare_tabular(
    expected: &[Row],
    actual: &TabularResult,
    ordering: Option<&[OrderingKey]>,
    tolerance: f64,
) -> ComparisonVerdict {
    let options = CompareOptions::default()
        .with_tolerance(tolerance)
        .with_ordering(ordering.map(<[OrderingKey]>::to_vec).unwrap_or_default())
        .with_columns(actual.columns.clone());
    compare_rows(expected, &actual.rows, &options)
}

fn rows_equal(expected: &[Cell], actual: &[Cell], tolerance: f64) -> bool {
    expected.len() == actual.len()
        && expected.iter().zip(actual).all(|(e, a)| e.equals(a, tolerance))
}

/// Multiset comparison. Exact 12-decimal keys are matched first; rows that
/// only agree within the tolerance fall back to a scan of the unused rows.
fn compare_unordered(expected: &[Row], actual: &[Row], tolerance: f64) -> ComparisonVerdict {
    let counts = format!("expected {} rows, got {}", expected.len(), actual.len());

    let actual_cells: Vec<Vec<Cell>> = actual.iter().map(cells).collect();
    let mut used = vec![false; actual.len()];
    let mut buckets: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, row) in actual_cells.iter().enumerate().rev() {
        buckets.entry(row_key(row)).or_default().push(idx);
    }

    for (idx, row) in expected.iter().enumerate() {
        let row_cells = cells(row);
        let mut found = None;
        if let Some(bucket) = buckets.get_mut(&row_key(&row_cells)) {
            while let Some(candidate) = bucket.pop() {
                if !used[candidate] {
                    found = Some(candidate);
                    break;
                }
            }
        }
        if found.is_none() {
            found = (0..actual_cells.len())
                .find(|&i| !used[i] && rows_equal(&row_cells, &actual_cells[i], tolerance));
        }
        match found {
            Some(i) => used[i] = true,
            None => {
                return ComparisonVerdict::fail(format!(
                    "Missing expected row {}: {} ({counts})",
                    idx + 1,
                    display_row(row)
                ))
            }
        }
    }

    if let Some(idx) = used.iter().position(|u| !u) {
        return ComparisonVerdict::fail(format!(
            "Unexpected row {}: {} ({counts})",
            idx + 1,
            display_row(&actual[idx])
        ));
    }

    ComparisonVerdict::pass(format!("Result matches expected rows ({} rows).", expected.len()))
}

fn resolve_ordering(
    ordering: &[OrderingKey],
    columns: &[String],
) -> Result<Vec<(usize, SortDirection)>, String> {
    ordering
        .iter()
        .map(|key| {
            let by = key.by.trim();
            let idx = match by.parse::<usize>() {
                Ok(pos) if pos >= 1 && (columns.is_empty() || pos <= columns.len()) => pos - 1,
                Ok(_) => return Err(by.to_string()),
                Err(_) => columns
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(by))
                    .ok_or_else(|| by.to_string())?,
            };
            Ok((idx, key.direction))
        })
        .collect()
}

fn sorted(rows: &[Row], keys: &[(usize, SortDirection)]) -> Vec<(Row, Vec<Cell>)> {
    let mut out: Vec<(Row, Vec<Cell>)> = rows.iter().map(|r| (r.clone(), cells(r))).collect();
    out.sort_by(|(_, a), (_, b)| {
        for (idx, direction) in keys {
            let ord = match (a.get(*idx), b.get(*idx)) {
                (Some(x), Some(y)) => x.sort_cmp(y),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            let ord = match direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    out
}

fn compare_ordered(expected: &[Row], actual: &[Row], options: &CompareOptions) -> ComparisonVerdict {
    let keys = match resolve_ordering(&options.ordering, &options.columns) {
        Ok(keys) => keys,
        Err(column) => {
            return ComparisonVerdict::fail(format!("Cannot resolve ordering column: {column}"))
        }
    };

    if expected.len() != actual.len() {
        return ComparisonVerdict::fail(format!(
            "Row count mismatch: expected {}, got {}",
            expected.len(),
            actual.len()
        ));
    }

    let expected = sorted(expected, &keys);
    let actual = sorted(actual, &keys);

    for (r, ((exp_row, exp_cells), (act_row, act_cells))) in expected.iter().zip(&actual).enumerate() {
        if exp_cells.len() != act_cells.len() {
            return ComparisonVerdict::fail(format!(
                "Row {}: expected {} columns, got {}",
                r + 1,
                exp_cells.len(),
                act_cells.len()
            ));
        }
        for (c, (e, a)) in exp_cells.iter().zip(act_cells).enumerate() {
            if !e.equals(a, options.tolerance) {
                return ComparisonVerdict::fail(format!(
                    "Row {}, column {}: expected {}, got {}",
                    r + 1,
                    c + 1,
                    display_value(exp_row.get(c)),
                    display_value(act_row.get(c))
                ));
            }
        }
    }

    ComparisonVerdict::pass(format!(
        "Result matches expected rows in required order ({} rows).",
        expected.len()
    ))
}

// ---------------------------------------------------------------------------
// Output comparison
// ---------------------------------------------------------------------------

fn unify_line_endings(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

/// Trim, unify line endings and collapse whitespace within each line.
pub fn normalize_output(s: &str) -> String {
    unify_line_endings(s.trim())
        .split('\n')
        .map(|line| WHITESPACE_RUN.replace_all(line, " ").trim().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Unify line endings and trim, leaving internal whitespace intact.
pub fn normalize_output_strict(s: &str) -> String {
    unify_line_endings(s).trim().to_string()
}

/// Compare captured output with an expected string.
pub fn compare_output(actual: &str, expected: &str, strict: bool) -> ComparisonVerdict {
    let (a, e) = if strict {
        (normalize_output_strict(actual), normalize_output_strict(expected))
    } else {
        (normalize_output(actual), normalize_output(expected))
    };
    if a == e {
        ComparisonVerdict::pass("Output matches expected.")
    } else {
        ComparisonVerdict::fail(format!("Expected output:\n{e}\nActual output:\n{a}"))
    }
}

/// Test the trimmed output against a multi-line, dot-all regex.
pub fn match_output_pattern(actual: &str, pattern: &str) -> ComparisonVerdict {
    let re = match RegexBuilder::new(pattern)
        .multi_line(true)
        .dot_matches_new_line(true)
        .build()
    {
        Ok(re) => re,
        Err(e) => return ComparisonVerdict::fail(format!("Invalid expected pattern: {e}")),
    };
    let trimmed = actual.trim();
    if re.is_match(trimmed) {
        ComparisonVerdict::pass("Output matches expected pattern.")
    } else {
        ComparisonVerdict::fail(format!(
            "Output does not match pattern /{pattern}/. Actual output:\n{trimmed}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(v: Value) -> Vec<Row> {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn unordered_ignores_row_order() {
        let expected = rows(json!([[1, "a"], [2, "b"], [2, "b"]]));
        let actual = rows(json!([[2, "b"], [1, "a"], [2, "b"]]));
        let verdict = compare_rows(&expected, &actual, &CompareOptions::default());
        assert!(verdict.is_correct, "{}", verdict.message);
    }

    #[test]
    fn missing_row_is_named() {
        let expected = rows(json!([[1, "a"], [2, "b"]]));
        let actual = rows(json!([[1, "a"]]));
        let verdict = compare_rows(&expected, &actual, &CompareOptions::default());
        assert!(!verdict.is_correct);
        assert_eq!(
            verdict.message,
            r#"Missing expected row 2: [2,"b"] (expected 2 rows, got 1)"#
        );
    }

    #[test]
    fn extra_row_is_named() {
        let expected = rows(json!([[1]]));
        let actual = rows(json!([[1], [7]]));
        let verdict = compare_rows(&expected, &actual, &CompareOptions::default());
        assert!(!verdict.is_correct);
        assert!(verdict.message.starts_with("Unexpected row 2: [7]"));
    }

    #[test]
    fn duplicate_counts_matter() {
        let expected = rows(json!([[1], [1]]));
        let actual = rows(json!([[1], [2]]));
        assert!(!compare_rows(&expected, &actual, &CompareOptions::default()).is_correct);
    }

    #[test]
    fn float_noise_is_tolerated() {
        let expected = rows(json!([[10.0, "x"]]));
        let actual = rows(json!([[10.000000000001, "x"]]));
        assert!(compare_rows(&expected, &actual, &CompareOptions::default()).is_correct);
    }

    #[test]
    fn numeric_strings_and_negative_zero() {
        let expected = rows(json!([["25.50", 0.0]]));
        let actual = rows(json!([[25.5, -0.0000000000001]]));
        assert!(compare_rows(&expected, &actual, &CompareOptions::default()).is_correct);
    }

    #[test]
    fn text_cells_are_trimmed_and_null_is_text() {
        let expected = rows(json!([["USA", null, true]]));
        let actual = rows(json!([[" USA ", "null", "true"]]));
        assert!(compare_rows(&expected, &actual, &CompareOptions::default()).is_correct);
    }

    #[test]
    fn tolerance_is_tunable() {
        let expected = rows(json!([[1.0]]));
        let actual = rows(json!([[1.04]]));
        assert!(!compare_rows(&expected, &actual, &CompareOptions::default()).is_correct);
        let loose = CompareOptions::default().with_tolerance(0.1);
        assert!(compare_rows(&expected, &actual, &loose).is_correct);
    }

    #[test]
    fn unordered_values_within_tolerance_match_across_rounding_boundaries() {
        let expected = rows(json!([[0.0000014]]));
        let actual = rows(json!([[0.0000016]]));
        let verdict = compare_rows(&expected, &actual, &CompareOptions::default());
        assert!(verdict.is_correct, "{}", verdict.message);

        let loose = CompareOptions::default().with_tolerance(0.1);
        assert!(compare_rows(&rows(json!([[1.04]])), &rows(json!([[1.06]])), &loose).is_correct);
        assert!(!compare_rows(&rows(json!([[1.0]])), &rows(json!([[1.2]])), &loose).is_correct);
    }

    #[test]
    fn unordered_tolerance_match_consumes_one_row() {
        let loose = CompareOptions::default().with_tolerance(0.1);
        let expected = rows(json!([["a", 1.0], ["a", 1.0]]));
        let actual = rows(json!([["a", 1.05], ["a", 3.0]]));
        let verdict = compare_rows(&expected, &actual, &loose);
        assert!(!verdict.is_correct);
        assert!(verdict.message.starts_with("Missing expected row 2"), "{}", verdict.message);

        let actual = rows(json!([["a", 0.95], ["a", 1.0]]));
        assert!(compare_rows(&expected, &actual, &loose).is_correct);
    }

    #[test]
    fn ordered_mode_sorts_by_keys() {
        let options = CompareOptions::default()
            .with_columns(vec!["country".into(), "total".into()])
            .with_ordering(vec![OrderingKey::desc("total")]);
        let expected = rows(json!([["USA", 30], ["UK", 20]]));
        let actual = rows(json!([["UK", 20], ["USA", 30.0]]));
        let verdict = compare_rows(&expected, &actual, &options);
        assert!(verdict.is_correct, "{}", verdict.message);
    }

    #[test]
    fn ordered_mode_reports_cell_position() {
        let options = CompareOptions::default().with_ordering(vec![OrderingKey::asc("1")]);
        let expected = rows(json!([[1, "a"], [2, "b"]]));
        let actual = rows(json!([[1, "a"], [2, "c"]]));
        let verdict = compare_rows(&expected, &actual, &options);
        assert_eq!(verdict.message, r#"Row 2, column 2: expected "b", got "c""#);
    }

    #[test]
    fn ordered_mode_reports_counts_and_widths() {
        let options = CompareOptions::default().with_ordering(vec![OrderingKey::asc("1")]);
        let verdict = compare_rows(&rows(json!([[1]])), &rows(json!([[1], [2]])), &options);
        assert_eq!(verdict.message, "Row count mismatch: expected 1, got 2");

        let verdict = compare_rows(&rows(json!([[1]])), &rows(json!([[1, 2]])), &options);
        assert_eq!(verdict.message, "Row 1: expected 1 columns, got 2");
    }

    #[test]
    fn unresolvable_ordering_column_fails() {
        let options = CompareOptions::default()
            .with_columns(vec!["a".into()])
            .with_ordering(vec![OrderingKey::asc("b")]);
        let verdict = compare_rows(&rows(json!([[1]])), &rows(json!([[1]])), &options);
        assert!(!verdict.is_correct);
        assert_eq!(verdict.message, "Cannot resolve ordering column: b");

        let out_of_range = CompareOptions::default()
            .with_columns(vec!["a".into()])
            .with_ordering(vec![OrderingKey::asc("2")]);
        assert!(!compare_rows(&rows(json!([[1]])), &rows(json!([[1]])), &out_of_range).is_correct);
    }

    #[test]
    fn nulls_sort_before_numbers_before_text() {
        let mut c = vec![Cell::Text("a".into()), Cell::Number(1.0), Cell::Null];
        c.sort_by(Cell::sort_cmp);
        assert_eq!(c, vec![Cell::Null, Cell::Number(1.0), Cell::Text("a".into())]);
    }

    #[test]
    fn tabular_uses_engine_columns() {
        let actual = TabularResult {
            columns: vec!["user_id".into(), "amount".into()],
            rows: rows(json!([[2, 5.5], [1, 3]])),
        };
        let ordering = [OrderingKey::asc("user_id")];
        let verdict = compare_tabular(&rows(json!([[1, 3], [2, 5.5]])), &actual, Some(&ordering[..]), 1e-6);
        assert!(verdict.is_correct, "{}", verdict.message);
    }

    #[test]
    fn output_normalization() {
        assert_eq!(normalize_output("  a   b \r\nc\t d\r\n\n"), "a b\nc d");
        assert_eq!(normalize_output_strict("\r\n a  b\r"), "a  b");
        assert!(compare_output("3  4\r\n", "3 4", false).is_correct);
        assert!(!compare_output("3  4\r\n", "3 4", true).is_correct);
        assert!(compare_output("3  4\r\n", "3  4", true).is_correct);
    }

    #[test]
    fn output_mismatch_shows_both_sides() {
        let verdict = compare_output("41", "42", false);
        assert!(!verdict.is_correct);
        assert!(verdict.message.contains("42"));
        assert!(verdict.message.contains("41"));
    }

    #[test]
    fn pattern_matching_is_multiline_dotall() {
        assert!(match_output_pattern("\ntotal: 3\ndone\n", r"^total: \d+.done$").is_correct);
        assert!(!match_output_pattern("nothing", r"^total").is_correct);
        let invalid = match_output_pattern("x", r"(unclosed");
        assert!(!invalid.is_correct);
        assert!(invalid.message.starts_with("Invalid expected pattern"));
    }
}
