//! TOML challenge-set parser.
//!
//! Loads challenge sets from TOML files and directories. Schemas are routed
//! through the validated model constructors.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::model::{
    ChallengeKind, ChallengeSet, ConceptChallenge, Difficulty, ExpectedResultShape, PythonChallenge, Row,
    SchemaColumn, SchemaTable, SeedData, SqlChallenge, SqlSchema,
};
use crate::sql::validate;

/// Intermediate TOML structure for challenge-set files.
#[derive(Debug, Deserialize)]
struct TomlChallengeFile {
    challenge_set: TomlChallengeSetHeader,
    #[serde(default)]
    concept: Vec<TomlConcept>,
    #[serde(default)]
    sql: Vec<TomlSql>,
    #[serde(default)]
    python: Vec<TomlPython>,
}

#[derive(Debug, Deserialize)]
struct TomlChallengeSetHeader {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct TomlConcept {
    id: u32,
    question: String,
    solution: String,
    #[serde(default)]
    key_terms: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    difficulty: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlSql {
    id: u32,
    question: String,
    solution: String,
    #[serde(default)]
    expected_result: Option<Vec<Row>>,
    #[serde(default)]
    schema: Option<TomlSchema>,
    #[serde(default)]
    data: SeedData,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    difficulty: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlSchema {
    #[serde(default)]
    tables: Vec<TomlTable>,
    #[serde(default)]
    expected_result_shape: Option<ExpectedResultShape>,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlTable {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    columns: Vec<TomlColumn>,
    #[serde(default)]
    sample_rows: Vec<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct TomlColumn {
    name: String,
    #[serde(rename = "type", default)]
    sql_type: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    nullable: Option<bool>,
    #[serde(default)]
    pk: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct TomlPython {
    id: u32,
    question: String,
    solution: String,
    #[serde(default)]
    expected_output: Option<String>,
    #[serde(default)]
    expected_pattern: Option<String>,
    #[serde(default)]
    strict_comparison: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    skip_verification: bool,
    #[serde(default)]
    heavy: bool,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    difficulty: Option<String>,
}

fn parse_difficulty(label: Option<String>) -> Result<Option<Difficulty>> {
    label
        .map(|l| l.parse::<Difficulty>().map_err(anyhow::Error::from))
        .transpose()
}

fn build_table(table: TomlTable) -> Result<SchemaTable> {
    let columns = table
        .columns
        .into_iter()
        .map(|c| {
            let mut column = SchemaColumn::new(&c.name, &c.sql_type)?;
            column.description = c.description;
            column.nullable = c.nullable;
            column.pk = c.pk;
            Ok(column)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut built = SchemaTable::new(&table.name, columns)
        .with_context(|| format!("invalid table '{}'", table.name))?;
    built.description = table.description;
    built.sample_rows = table.sample_rows;
    Ok(built)
}

/// Parse a single TOML file into a `ChallengeSet`.
pub fn parse_challenge_set(path: &Path) -> Result<ChallengeSet> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read challenge set file: {}", path.display()))?;

    parse_challenge_set_str(&content, path)
}

/// Parse a TOML string into a `ChallengeSet` (useful for testing).
pub fn parse_challenge_set_str(content: &str, source_path: &Path) -> Result<ChallengeSet> {
    let parsed: TomlChallengeFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let concept = parsed
        .concept
        .into_iter()
        .map(|c| {
            Ok(ConceptChallenge {
                id: c.id,
                question: c.question,
                solution: c.solution,
                key_terms: c.key_terms,
                tags: c.tags,
                difficulty: parse_difficulty(c.difficulty)
                    .with_context(|| format!("concept challenge {}", c.id))?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let sql = parsed
        .sql
        .into_iter()
        .map(|c| {
            let id = c.id;
            let schema = c
                .schema
                .map(|s| -> Result<SqlSchema> {
                    Ok(SqlSchema {
                        tables: s
                            .tables
                            .into_iter()
                            .map(build_table)
                            .collect::<Result<Vec<_>>>()?,
                        expected_result_shape: s.expected_result_shape,
                        version: s.version,
                    })
                })
                .transpose()
                .with_context(|| format!("sql challenge {id}"))?;

            Ok(SqlChallenge {
                id,
                question: c.question,
                solution: c.solution,
                expected_result: c.expected_result,
                schema,
                data: c.data,
                tags: c.tags,
                difficulty: parse_difficulty(c.difficulty)
                    .with_context(|| format!("sql challenge {id}"))?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let python = parsed
        .python
        .into_iter()
        .map(|c| {
            Ok(PythonChallenge {
                id: c.id,
                question: c.question,
                solution: c.solution,
                expected_output: c.expected_output,
                expected_pattern: c.expected_pattern,
                strict_comparison: c.strict_comparison,
                data: c.data,
                skip_verification: c.skip_verification,
                heavy: c.heavy,
                tags: c.tags,
                difficulty: parse_difficulty(c.difficulty)
                    .with_context(|| format!("python challenge {}", c.id))?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ChallengeSet {
        id: parsed.challenge_set.id,
        name: parsed.challenge_set.name,
        description: parsed.challenge_set.description,
        concept,
        sql,
        python,
    })
}

/// Recursively load all `.toml` challenge-set files from a directory.
pub fn load_challenge_directory(dir: &Path) -> Result<Vec<ChallengeSet>> {
    let mut sets = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            sets.extend(load_challenge_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_challenge_set(&path) {
                Ok(set) => sets.push(set),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    Ok(sets)
}

/// A validation warning for a challenge set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    /// Challenge the warning refers to (e.g. "sql 3"), if any.
    pub challenge: Option<String>,
    /// Warning message.
    pub message: String,
}

impl ValidationWarning {
    fn new(kind: ChallengeKind, id: u32, message: impl Into<String>) -> Self {
        Self {
            challenge: Some(format!("{kind} {id}")),
            message: message.into(),
        }
    }
}

/// Validate a challenge set for common authoring issues.
///
/// SQL reference solutions are run through the identifier resolver, so a
/// solution that names a column missing from the schema is reported here.
pub fn validate_challenge_set(set: &ChallengeSet) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    let duplicates = |kind: ChallengeKind, ids: Vec<u32>, warnings: &mut Vec<ValidationWarning>| {
        let mut seen = HashSet::new();
        for id in ids {
            if !seen.insert(id) {
                warnings.push(ValidationWarning::new(kind, id, format!("duplicate {kind} id: {id}")));
            }
        }
    };
    duplicates(ChallengeKind::Concept, set.concept.iter().map(|c| c.id).collect(), &mut warnings);
    duplicates(ChallengeKind::Sql, set.sql.iter().map(|c| c.id).collect(), &mut warnings);
    duplicates(ChallengeKind::Python, set.python.iter().map(|c| c.id).collect(), &mut warnings);

    for c in &set.concept {
        if c.key_terms.iter().all(|t| t.trim().is_empty()) {
            warnings.push(ValidationWarning::new(
                ChallengeKind::Concept,
                c.id,
                "no key terms; every answer receives full credit",
            ));
        }
    }

    for c in &set.sql {
        if c.expected_result.is_none() {
            warnings.push(ValidationWarning::new(
                ChallengeKind::Sql,
                c.id,
                "no expected_result; submissions are only checked for errors",
            ));
        }
        for issue in validate(&c.solution, &c.tables()).issues {
            warnings.push(ValidationWarning::new(
                ChallengeKind::Sql,
                c.id,
                format!("reference solution: {issue}"),
            ));
        }
    }

    for c in &set.python {
        if c.skip_verification {
            continue;
        }
        if c.expected_output.is_none() && c.expected_pattern.is_none() {
            warnings.push(ValidationWarning::new(
                ChallengeKind::Python,
                c.id,
                "no expected_output or expected_pattern; challenge is never graded",
            ));
        }
        if let Some(pattern) = &c.expected_pattern {
            if let Err(e) = regex::Regex::new(pattern) {
                warnings.push(ValidationWarning::new(
                    ChallengeKind::Python,
                    c.id,
                    format!("invalid expected_pattern: {e}"),
                ));
            }
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SortDirection;
    use std::path::PathBuf;

    const SAMPLE: &str = r#"
[challenge_set]
id = "cap-basics"
name = "CAP basics"
description = "Distributed systems warm-up"

[[concept]]
id = 1
question = "Explain the CAP theorem."
solution = "Consistency, availability and partition tolerance cannot all hold."
key_terms = ["consistency", "availability", "partition tolerance"]
tags = ["cap"]
difficulty = "beginner"

[[sql]]
id = 1
question = "Average transaction amount"
solution = "SELECT AVG(amount) FROM transactions;"
expected_result = [[25.0]]

[sql.data]
transactions = [
  { transaction_id = 1, amount = 20 },
  { transaction_id = 2, amount = 30 },
]

[[sql.schema.tables]]
name = "transactions"
columns = [
  { name = "transaction_id", type = "INTEGER", pk = true },
  { name = "amount", type = "REAL", nullable = false },
]

[[sql.schema.expected_result_shape.ordering]]
by = "avg_amount"
direction = "desc"

[[python]]
id = 1
question = "Count the records"
solution = "print(len(raw_data))"
expected_output = "3"
data = [1, 2, 3]
heavy = true
"#;

    fn path() -> PathBuf {
        PathBuf::from("sample.toml")
    }

    #[test]
    fn parse_full_set() {
        let set = parse_challenge_set_str(SAMPLE, &path()).unwrap();
        assert_eq!(set.id, "cap-basics");
        assert_eq!(set.len(), 3);

        let concept = set.concept(1).unwrap();
        assert_eq!(concept.key_terms.len(), 3);
        assert_eq!(concept.difficulty, Some(Difficulty::Beginner));

        let sql = set.sql(1).unwrap();
        assert_eq!(sql.expected_result.as_ref().unwrap()[0][0], serde_json::json!(25.0));
        assert_eq!(sql.data["transactions"].len(), 2);
        let schema = sql.schema.as_ref().unwrap();
        assert_eq!(schema.tables[0].columns[0].pk, Some(true));
        assert_eq!(schema.tables[0].columns[1].nullable, Some(false));
        let ordering = schema.ordering().unwrap();
        assert_eq!(ordering[0].by, "avg_amount");
        assert_eq!(ordering[0].direction, SortDirection::Desc);

        let python = set.python(1).unwrap();
        assert!(python.heavy);
        assert_eq!(python.data, Some(serde_json::json!([1, 2, 3])));
        assert!(!python.strict_comparison);
    }

    #[test]
    fn parse_minimal_set() {
        let set = parse_challenge_set_str(
            "[challenge_set]\nid = \"empty\"\nname = \"Empty\"\n",
            &path(),
        )
        .unwrap();
        assert!(set.is_empty());
        assert_eq!(set.description, "");
    }

    #[test]
    fn unknown_difficulty_is_rejected() {
        let toml = r#"
[challenge_set]
id = "x"
name = "x"

[[concept]]
id = 1
question = "q"
solution = "s"
difficulty = "expert"
"#;
        let err = parse_challenge_set_str(toml, &path()).unwrap_err();
        assert!(format!("{err:#}").contains("unknown difficulty: expert"));
    }

    #[test]
    fn duplicate_schema_columns_are_rejected() {
        let toml = r#"
[challenge_set]
id = "x"
name = "x"

[[sql]]
id = 4
question = "q"
solution = "SELECT 1"

[[sql.schema.tables]]
name = "users"
columns = [{ name = "id", type = "INTEGER" }, { name = "ID", type = "TEXT" }]
"#;
        let err = parse_challenge_set_str(toml, &path()).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("sql challenge 4"), "{msg}");
        assert!(msg.contains("duplicate column"), "{msg}");
    }

    #[test]
    fn malformed_toml_names_the_file() {
        let err = parse_challenge_set_str("not [valid", &path()).unwrap_err();
        assert!(err.to_string().contains("sample.toml"));
    }

    #[test]
    fn directory_loading_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.toml"), SAMPLE).unwrap();
        std::fs::write(dir.path().join("bad.toml"), "[[[").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let nested = dir.path().join("more");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(nested.join("also.toml"), SAMPLE).unwrap();

        let sets = load_challenge_directory(dir.path()).unwrap();
        assert_eq!(sets.len(), 2);
    }

    #[test]
    fn directory_loading_requires_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file.toml");
        std::fs::write(&file, SAMPLE).unwrap();
        assert!(load_challenge_directory(&file).is_err());
    }

    #[test]
    fn sample_set_has_no_warnings() {
        let set = parse_challenge_set_str(SAMPLE, &path()).unwrap();
        assert!(validate_challenge_set(&set).is_empty());
    }

    #[test]
    fn validation_reports_authoring_issues() {
        let toml = r#"
[challenge_set]
id = "lint"
name = "Lint"

[[concept]]
id = 1
question = "q"
solution = "s"

[[concept]]
id = 1
question = "q"
solution = "s"
key_terms = ["latency"]

[[sql]]
id = 2
question = "q"
solution = "SELECT users.bogus FROM users"

[sql.data]
users = [{ user_id = 1 }]

[[python]]
id = 3
question = "q"
solution = "print(1)"

[[python]]
id = 4
question = "q"
solution = "print(1)"
expected_pattern = "(unclosed"
"#;
        let set = parse_challenge_set_str(toml, &path()).unwrap();
        let warnings = validate_challenge_set(&set);
        let messages: Vec<String> = warnings
            .iter()
            .map(|w| format!("{}: {}", w.challenge.as_deref().unwrap_or("-"), w.message))
            .collect();

        assert!(messages.iter().any(|m| m == "concept 1: duplicate concept id: 1"), "{messages:?}");
        assert!(messages.iter().any(|m| m.starts_with("concept 1: no key terms")));
        assert!(messages.iter().any(|m| m.starts_with("sql 2: no expected_result")));
        assert!(messages
            .iter()
            .any(|m| m == "sql 2: reference solution: Unknown column: users.bogus"));
        assert!(messages.iter().any(|m| m.starts_with("python 3: no expected_output")));
        assert!(messages.iter().any(|m| m.starts_with("python 4: invalid expected_pattern")));
    }
}
