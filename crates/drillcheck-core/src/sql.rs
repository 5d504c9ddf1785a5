//! Static identifier checks for SQL submissions.
//!
//! Before a query runs, table and column references are resolved against the
//! declared schema so learners get "unknown column" hints instead of raw
//! engine errors. Resolution is regex-based and advisory: constructs it
//! cannot parse are skipped, and issues never block execution unless strict
//! mode is requested.
//!
//! Known limitation: the CTE header is found by the first `select` after a
//! word-bounded `with`, so nested CTEs or `select` inside string literals can
//! confuse it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SqlValidationError;
use crate::model::SchemaTable;

static QUOTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""([^"]+)""#).unwrap());
static CTE_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)\bwith\b\s+(.+?)select").unwrap());
static CTE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([a-z0-9_]+)\s+as\s*\(").unwrap());
static QUALIFIED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z0-9_]+)\.([A-Za-z0-9_]+)").unwrap());
static TABLE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:from|join)\s+([a-z0-9_]+)").unwrap());
static ALIAS_AFTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s+(?:as\s+)?([a-z0-9_]+)").unwrap());
static COLUMN_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z0-9_]+)\.([A-Za-z0-9_*]+)").unwrap());
static STAR_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z0-9_]+)\.\*").unwrap());
static SELECT_STAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)select\s+\*").unwrap());

/// Words that can follow a table name without being its alias.
const NON_ALIAS_KEYWORDS: &[&str] = &[
    "as", "where", "join", "on", "left", "right", "inner", "outer", "full", "cross", "group",
    "order", "limit", "having", "union", "natural", "using", "select", "window", "except",
    "intersect", "offset",
];

/// Outcome of resolving identifiers in one query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierValidationResult {
    /// Human-readable issues in discovery order, without duplicates.
    pub issues: Vec<String>,
    /// Lowercased alias to the table it stands for.
    pub alias_map: BTreeMap<String, String>,
    /// Lowercased CTE names, in declaration order.
    pub cte_names: Vec<String>,
}

impl IdentifierValidationResult {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    fn push_issue(&mut self, issue: String) {
        if !self.issues.contains(&issue) {
            self.issues.push(issue);
        }
    }
}

/// Resolves table and column references in a query against a schema.
pub trait IdentifierResolver: Send + Sync {
    fn resolve(&self, sql: &str, tables: &[SchemaTable]) -> IdentifierValidationResult;

    /// Like [`IdentifierResolver::resolve`], but any issue is an error.
    fn resolve_strict(
        &self,
        sql: &str,
        tables: &[SchemaTable],
    ) -> Result<IdentifierValidationResult, SqlValidationError> {
        let result = self.resolve(sql, tables);
        if result.is_clean() {
            Ok(result)
        } else {
            Err(SqlValidationError::UnresolvedIdentifiers(result.issues))
        }
    }
}

/// Regex-based resolver covering aliases, simple CTEs and wildcards.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicResolver;

/// Resolve identifiers with the [`HeuristicResolver`].
pub fn validate(sql: &str, tables: &[SchemaTable]) -> IdentifierValidationResult {
    HeuristicResolver.resolve(sql, tables)
}

/// Resolve identifiers, failing when any issue is found.
pub fn validate_strict(
    sql: &str,
    tables: &[SchemaTable],
) -> Result<IdentifierValidationResult, SqlValidationError> {
    HeuristicResolver.resolve_strict(sql, tables)
}

struct Catalog {
    tables: HashSet<String>,
    columns: HashMap<String, Vec<String>>,
    all_columns: HashSet<String>,
}

impl Catalog {
    fn new(tables: &[SchemaTable]) -> Self {
        let mut catalog = Self {
            tables: HashSet::new(),
            columns: HashMap::new(),
            all_columns: HashSet::new(),
        };
        for table in tables {
            let name = table.name.to_lowercase();
            let columns = table.column_names();
            catalog.all_columns.extend(columns.iter().cloned());
            catalog.tables.insert(name.clone());
            catalog.columns.insert(name, columns);
        }
        catalog
    }

    fn has_column(&self, table: &str, column: &str) -> bool {
        self.columns
            .get(table)
            .is_some_and(|cols| cols.iter().any(|c| c == column))
    }
}

impl IdentifierResolver for HeuristicResolver {
    fn resolve(&self, sql: &str, tables: &[SchemaTable]) -> IdentifierValidationResult {
        let catalog = Catalog::new(tables);
        let mut known_tables = catalog.tables.clone();
        let mut result = IdentifierValidationResult::default();
        let working = QUOTED.replace_all(sql, "$1");

        // CTE names, and column refs on real tables inside each CTE chunk.
        if let Some(section) = CTE_SECTION.captures(&working).and_then(|c| c.get(1)) {
            for chunk in section.as_str().split(',') {
                let Some(name) = CTE_NAME.captures(chunk).and_then(|c| c.get(1)) else {
                    continue;
                };
                result.cte_names.push(name.as_str().to_lowercase());
                for cap in QUALIFIED.captures_iter(chunk) {
                    let table = cap[1].to_lowercase();
                    let column = cap[2].to_lowercase();
                    if catalog.tables.contains(&table) && !catalog.has_column(&table, &column) {
                        result.push_issue(format!("Unknown column: {table}.{column}"));
                    }
                }
            }
        }
        known_tables.extend(result.cte_names.iter().cloned());

        let mut table_tokens: Vec<String> = Vec::new();
        for cap in TABLE_TOKEN.captures_iter(&working) {
            let Some(token) = cap.get(1) else { continue };
            let table = token.as_str().to_lowercase();

            if known_tables.contains(&table) {
                if let Some(alias) = ALIAS_AFTER
                    .captures(&working[token.end()..])
                    .and_then(|c| c.get(1))
                {
                    let alias = alias.as_str().to_lowercase();
                    if !NON_ALIAS_KEYWORDS.contains(&alias.as_str()) {
                        result.alias_map.insert(alias, table.clone());
                    }
                }
            }
            table_tokens.push(table);
        }

        for table in &table_tokens {
            let ambiguous = table.chars().all(|c| c.is_ascii_digit())
                || catalog.all_columns.contains(table);
            if !known_tables.contains(table) && !result.alias_map.contains_key(table) && !ambiguous
            {
                result.push_issue(format!("Unknown table: {table}"));
            }
        }

        for cap in COLUMN_REF.captures_iter(&working) {
            let raw_table = cap[1].to_lowercase();
            let column = cap[2].to_lowercase();
            let resolved = result
                .alias_map
                .get(&raw_table)
                .cloned()
                .unwrap_or_else(|| raw_table.clone());

            if !known_tables.contains(&resolved)
                || result.cte_names.contains(&resolved)
                || column == "*"
            {
                continue;
            }
            if !catalog.has_column(&resolved, &column) {
                result.push_issue(format!("Unknown column: {raw_table}.{column}"));
            }
        }

        for cap in STAR_REF.captures_iter(&working) {
            let raw = cap[1].to_lowercase();
            let resolved = result.alias_map.get(&raw).unwrap_or(&raw);
            if !known_tables.contains(resolved) {
                result.push_issue(format!("Unknown table for wildcard: {raw}"));
            }
        }

        if SELECT_STAR.is_match(&working) && table_tokens.is_empty() {
            result.push_issue("Wildcard * used without FROM table".to_string());
        }

        if !result.is_clean() {
            tracing::debug!(issues = result.issues.len(), "identifier issues found");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SchemaColumn;

    fn table(name: &str, columns: &[&str]) -> SchemaTable {
        SchemaTable::new(
            name,
            columns
                .iter()
                .map(|c| SchemaColumn::new(c, "TEXT").unwrap())
                .collect(),
        )
        .unwrap()
    }

    fn schema() -> Vec<SchemaTable> {
        vec![
            table("users", &["user_id", "signup_date", "country"]),
            table(
                "transactions",
                &["transaction_id", "user_id", "amount", "created_at"],
            ),
        ]
    }

    fn issues(sql: &str) -> Vec<String> {
        validate(sql, &schema()).issues
    }

    #[test]
    fn flags_unknown_table() {
        assert!(issues("SELECT x.user_id FROM x").contains(&"Unknown table: x".to_string()));
    }

    #[test]
    fn flags_unknown_column() {
        assert_eq!(
            issues("SELECT users.missing_col FROM users"),
            vec!["Unknown column: users.missing_col"]
        );
    }

    #[test]
    fn accepts_valid_aliases() {
        let result = validate(
            "SELECT u.user_id, t.amount FROM users u JOIN transactions t ON u.user_id = t.user_id",
            &schema(),
        );
        assert!(result.is_clean(), "{:?}", result.issues);
        assert_eq!(result.alias_map["u"], "users");
        assert_eq!(result.alias_map["t"], "transactions");
    }

    #[test]
    fn alias_with_as_keyword() {
        let result = validate("SELECT u.bogus FROM users AS u", &schema());
        assert_eq!(result.alias_map["u"], "users");
        assert_eq!(result.issues, vec!["Unknown column: u.bogus"]);
    }

    #[test]
    fn keywords_are_not_aliases() {
        let result = validate(
            "SELECT users.country FROM users JOIN transactions ON users.user_id = transactions.user_id WHERE transactions.amount > 10",
            &schema(),
        );
        assert!(result.is_clean(), "{:?}", result.issues);
        assert!(result.alias_map.is_empty());
    }

    #[test]
    fn cte_names_are_opaque() {
        let result = validate(
            "WITH x AS (SELECT user_id, amount FROM transactions) SELECT x.user_id FROM x",
            &schema(),
        );
        assert!(result.is_clean(), "{:?}", result.issues);
        assert_eq!(result.cte_names, vec!["x"]);
    }

    #[test]
    fn unknown_column_inside_cte_body() {
        let found = issues(
            "WITH x AS (SELECT transactions.bogus FROM transactions) SELECT * FROM x",
        );
        assert_eq!(found, vec!["Unknown column: transactions.bogus"]);
    }

    #[test]
    fn multiple_ctes() {
        let result = validate(
            "WITH a AS (SELECT 1), b AS (SELECT 2) SELECT a.anything FROM a JOIN b ON 1 = 1",
            &schema(),
        );
        assert_eq!(result.cte_names, vec!["a"]);
        // Only the header before the first select is scanned.
        assert!(result.issues.iter().any(|i| i == "Unknown table: b"));
    }

    #[test]
    fn wildcard_on_alias_is_fine() {
        assert!(issues("SELECT u.* FROM users u").is_empty());
    }

    #[test]
    fn wildcard_on_unknown_alias() {
        assert_eq!(
            issues("SELECT z.* FROM users"),
            vec!["Unknown table for wildcard: z"]
        );
    }

    #[test]
    fn wildcard_without_from() {
        assert!(issues("SELECT *")
            .iter()
            .any(|i| i.contains("Wildcard *")));
    }

    #[test]
    fn quoted_identifiers_are_unwrapped() {
        assert!(issues(r#"SELECT "users"."country" FROM "users""#).is_empty());
        assert_eq!(
            issues(r#"SELECT "users"."nope" FROM "users""#),
            vec!["Unknown column: users.nope"]
        );
    }

    #[test]
    fn extract_from_column_not_flagged() {
        assert!(issues(
            "SELECT EXTRACT(YEAR FROM created_at) AS y, t.amount FROM transactions t"
        )
        .is_empty());
    }

    #[test]
    fn case_insensitive_resolution() {
        assert!(issues("select U.USER_ID from USERS u").is_empty());
    }

    #[test]
    fn issues_are_deduplicated() {
        assert_eq!(
            issues("SELECT users.nope, users.nope FROM users JOIN ghost ON 1 = 1 JOIN ghost ON 1 = 1"),
            vec!["Unknown table: ghost", "Unknown column: users.nope"]
        );
    }

    #[test]
    fn subqueries_and_numbers_are_skipped() {
        assert!(issues(
            "SELECT s.c FROM (SELECT country AS c FROM users) s WHERE 1.5 > 0"
        )
        .is_empty());
    }

    #[test]
    fn strict_mode_fails_exactly_when_issues_exist() {
        let tables = schema();
        assert!(validate_strict("SELECT users.country FROM users", &tables).is_ok());
        match validate_strict("SELECT users.nope FROM users", &tables) {
            Err(SqlValidationError::UnresolvedIdentifiers(found)) => {
                assert_eq!(found, vec!["Unknown column: users.nope"]);
            }
            other => panic!("expected strict failure, got {other:?}"),
        }
    }

    #[test]
    fn resolver_is_object_safe() {
        let resolver: Box<dyn IdentifierResolver> = Box::new(HeuristicResolver);
        assert!(resolver.resolve("SELECT 1", &schema()).is_clean());
    }
}
