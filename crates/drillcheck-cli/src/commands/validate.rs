//! The `drillcheck validate` command.

use std::path::PathBuf;

use anyhow::Result;

use drillcheck_core::parser;

pub fn execute(challenge_set_path: PathBuf) -> Result<()> {
    let sets = if challenge_set_path.is_dir() {
        parser::load_challenge_directory(&challenge_set_path)?
    } else {
        vec![parser::parse_challenge_set(&challenge_set_path)?]
    };

    let mut total_warnings = 0;

    for set in &sets {
        println!(
            "Challenge set: {} ({} concept, {} sql, {} python)",
            set.name,
            set.concept.len(),
            set.sql.len(),
            set.python.len()
        );

        let warnings = parser::validate_challenge_set(set);
        for w in &warnings {
            let prefix = w
                .challenge
                .as_ref()
                .map(|c| format!("  [{c}]"))
                .unwrap_or_else(|| "  ".to_string());
            println!("{prefix} WARNING: {}", w.message);
        }
        total_warnings += warnings.len();
    }

    if total_warnings == 0 {
        println!("All challenge sets valid.");
    } else {
        println!("\n{total_warnings} warning(s) found.");
    }

    Ok(())
}
