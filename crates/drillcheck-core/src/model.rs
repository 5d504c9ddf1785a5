//! Challenge content and schema types.
//!
//! Challenge records are read-only input supplied by content files. Schema
//! types carry validated constructors; the parser routes every table through
//! them so malformed schemas are rejected at load time.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ModelError;

/// One result row as produced by an execution engine or declared as expected.
pub type Row = Vec<Value>;

/// Seed rows per table name. Each row maps column name to cell value.
pub type SeedData = BTreeMap<String, Vec<Map<String, Value>>>;

/// Difficulty tier of a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Beginner => write!(f, "beginner"),
            Difficulty::Intermediate => write!(f, "intermediate"),
            Difficulty::Advanced => write!(f, "advanced"),
        }
    }
}

impl FromStr for Difficulty {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "beginner" => Ok(Difficulty::Beginner),
            "intermediate" => Ok(Difficulty::Intermediate),
            "advanced" => Ok(Difficulty::Advanced),
            other => Err(ModelError::UnknownDifficulty(other.to_string())),
        }
    }
}

/// Which kind of challenge an outcome refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeKind {
    Concept,
    Sql,
    Python,
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeKind::Concept => write!(f, "concept"),
            ChallengeKind::Sql => write!(f, "sql"),
            ChallengeKind::Python => write!(f, "python"),
        }
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A column of a declared table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaColumn {
    pub name: String,
    /// Generic SQL type label (INTEGER, TEXT, REAL, DATE, ...).
    #[serde(rename = "type", default)]
    pub sql_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub nullable: Option<bool>,
    #[serde(default)]
    pub pk: Option<bool>,
}

impl SchemaColumn {
    pub fn new(name: &str, sql_type: &str) -> Result<Self, ModelError> {
        if !is_identifier(name) {
            return Err(ModelError::InvalidIdentifier(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            sql_type: sql_type.to_string(),
            description: None,
            nullable: None,
            pk: None,
        })
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.pk = Some(true);
        self
    }
}

/// A declared table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaTable {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub columns: Vec<SchemaColumn>,
    /// Representative rows shown to learners.
    #[serde(default)]
    pub sample_rows: Vec<Map<String, Value>>,
}

impl SchemaTable {
    /// Build a table, rejecting bad names, empty column lists and duplicate
    /// columns (compared case-insensitively).
    pub fn new(name: &str, columns: Vec<SchemaColumn>) -> Result<Self, ModelError> {
        let table = Self {
            name: name.to_string(),
            description: None,
            columns,
            sample_rows: Vec::new(),
        };
        table.validate()?;
        Ok(table)
    }

    /// Check the invariants enforced by [`SchemaTable::new`].
    pub fn validate(&self) -> Result<(), ModelError> {
        if !is_identifier(&self.name) {
            return Err(ModelError::InvalidIdentifier(self.name.clone()));
        }
        if self.columns.is_empty() {
            return Err(ModelError::EmptyTable(self.name.clone()));
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            if !is_identifier(&column.name) {
                return Err(ModelError::InvalidIdentifier(column.name.clone()));
            }
            if !seen.insert(column.name.to_lowercase()) {
                return Err(ModelError::DuplicateColumn {
                    table: self.name.clone(),
                    column: column.name.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Lowercased column names in declaration order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.to_lowercase()).collect()
    }

    /// Synthesize a `CREATE TABLE` statement.
    pub fn to_ddl(&self) -> String {
        let pk_columns: Vec<&str> = self
            .columns
            .iter()
            .filter(|c| c.pk == Some(true))
            .map(|c| c.name.as_str())
            .collect();

        let mut defs: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let ty = if c.sql_type.trim().is_empty() {
                    "TEXT"
                } else {
                    c.sql_type.trim()
                };
                let mut def = format!("{} {}", c.name, ty);
                if c.nullable == Some(false) {
                    def.push_str(" NOT NULL");
                }
                def
            })
            .collect();

        if !pk_columns.is_empty() {
            defs.push(format!("PRIMARY KEY ({})", pk_columns.join(", ")));
        }

        format!("CREATE TABLE {} ({});", self.name, defs.join(", "))
    }
}

/// Sort direction of an ordering key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One key of a required result ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingKey {
    /// Column name, or a 1-based column position.
    pub by: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl OrderingKey {
    pub fn asc(by: &str) -> Self {
        Self {
            by: by.to_string(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(by: &str) -> Self {
        Self {
            by: by.to_string(),
            direction: SortDirection::Desc,
        }
    }
}

impl FromStr for OrderingKey {
    type Err = String;

    /// Parse `column` or `column:asc|desc`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (by, direction) = match s.trim().split_once(':') {
            Some((by, dir)) => {
                let direction = match dir.trim().to_lowercase().as_str() {
                    "asc" => SortDirection::Asc,
                    "desc" => SortDirection::Desc,
                    other => return Err(format!("unknown sort direction: {other}")),
                };
                (by.trim(), direction)
            }
            None => (s.trim(), SortDirection::Asc),
        };
        if by.is_empty() {
            return Err("empty ordering column".to_string());
        }
        Ok(Self {
            by: by.to_string(),
            direction,
        })
    }
}

/// Descriptor of an expected output column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultColumn {
    pub name: String,
    #[serde(rename = "type", default)]
    pub sql_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Shape contract for a SQL answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectedResultShape {
    #[serde(default)]
    pub columns: Vec<ResultColumn>,
    #[serde(default)]
    pub ordering: Vec<OrderingKey>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// All tables involved in a SQL challenge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlSchema {
    #[serde(default)]
    pub tables: Vec<SchemaTable>,
    #[serde(default)]
    pub expected_result_shape: Option<ExpectedResultShape>,
    #[serde(default)]
    pub version: Option<String>,
}

impl SqlSchema {
    /// Required ordering, if the shape declares one.
    pub fn ordering(&self) -> Option<&[OrderingKey]> {
        self.expected_result_shape
            .as_ref()
            .map(|s| s.ordering.as_slice())
            .filter(|o| !o.is_empty())
    }

    /// Expected output column names, if declared.
    pub fn result_columns(&self) -> Vec<String> {
        self.expected_result_shape
            .as_ref()
            .map(|s| s.columns.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }
}

/// A free-text conceptual question scored against key terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptChallenge {
    pub id: u32,
    pub question: String,
    pub solution: String,
    #[serde(default)]
    pub key_terms: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
}

/// A SQL question checked by execution and result comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlChallenge {
    pub id: u32,
    pub question: String,
    pub solution: String,
    #[serde(default)]
    pub expected_result: Option<Vec<Row>>,
    #[serde(default)]
    pub schema: Option<SqlSchema>,
    #[serde(default)]
    pub data: SeedData,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
}

impl SqlChallenge {
    /// Tables to validate identifiers against: the declared schema plus
    /// all-TEXT tables inferred for seed data it does not declare.
    pub fn tables(&self) -> Vec<SchemaTable> {
        let declared = self
            .schema
            .as_ref()
            .map(|s| s.tables.clone())
            .unwrap_or_default();
        with_inferred_tables(declared, &self.data)
    }
}

/// Append inferred tables for seeded tables missing from `declared`.
pub fn with_inferred_tables(mut declared: Vec<SchemaTable>, data: &SeedData) -> Vec<SchemaTable> {
    for inferred in infer_tables(data) {
        if !declared.iter().any(|t| t.name.eq_ignore_ascii_case(&inferred.name)) {
            declared.push(inferred);
        }
    }
    declared
}

/// Infer all-TEXT tables from the first row of each seeded table.
pub fn infer_tables(data: &SeedData) -> Vec<SchemaTable> {
    data.iter()
        .filter_map(|(name, rows)| {
            let first = rows.first()?;
            let columns = first
                .keys()
                .map(|k| SchemaColumn::new(k, "TEXT"))
                .collect::<Result<Vec<_>, _>>()
                .ok()?;
            SchemaTable::new(name, columns).ok()
        })
        .collect()
}

/// A Python question checked by captured stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PythonChallenge {
    pub id: u32,
    pub question: String,
    pub solution: String,
    #[serde(default)]
    pub expected_output: Option<String>,
    /// Regex tested against the trimmed output instead of exact comparison.
    #[serde(default)]
    pub expected_pattern: Option<String>,
    /// Compare with line-ending normalization and trimming only.
    #[serde(default)]
    pub strict_comparison: bool,
    /// Fixture bound to `raw_data` before the submission runs.
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub skip_verification: bool,
    /// Excluded from default grading runs.
    #[serde(default)]
    pub heavy: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
}

/// Rows returned by a SQL engine, with the column names it reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// Standard output captured from a Python run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedOutput {
    pub stdout: String,
    pub duration_ms: u64,
}

/// A collection of challenges loaded from one content file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeSet {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub concept: Vec<ConceptChallenge>,
    #[serde(default)]
    pub sql: Vec<SqlChallenge>,
    #[serde(default)]
    pub python: Vec<PythonChallenge>,
}

impl ChallengeSet {
    pub fn concept(&self, id: u32) -> Option<&ConceptChallenge> {
        self.concept.iter().find(|c| c.id == id)
    }

    pub fn sql(&self, id: u32) -> Option<&SqlChallenge> {
        self.sql.iter().find(|c| c.id == id)
    }

    pub fn python(&self, id: u32) -> Option<&PythonChallenge> {
        self.python.iter().find(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.concept.len() + self.sql.len() + self.python.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
