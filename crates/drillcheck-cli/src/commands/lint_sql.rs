//! The `drillcheck lint-sql` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use drillcheck_core::sql;

use super::load_set;

pub fn execute(challenge_set: PathBuf, id: u32, query: String, strict: bool) -> Result<()> {
    let set = load_set(&challenge_set)?;
    let challenge = set
        .sql(id)
        .with_context(|| format!("no sql challenge {id} in {}", set.id))?;
    let tables = challenge.tables();

    if strict {
        sql::validate_strict(&query, &tables)?;
        println!("No identifier issues.");
        return Ok(());
    }

    let result = sql::validate(&query, &tables);
    if !result.alias_map.is_empty() {
        let aliases: Vec<String> = result
            .alias_map
            .iter()
            .map(|(alias, table)| format!("{alias} -> {table}"))
            .collect();
        println!("Aliases: {}", aliases.join(", "));
    }
    if !result.cte_names.is_empty() {
        println!("CTEs: {}", result.cte_names.join(", "));
    }
    if result.is_clean() {
        println!("No identifier issues.");
    } else {
        for issue in &result.issues {
            println!("  WARNING: {issue}");
        }
        println!("\n{} issue(s) found.", result.issues.len());
    }
    Ok(())
}
