//! The `drillcheck init` command.

use std::path::Path;

use anyhow::{Context, Result};

pub fn execute() -> Result<()> {
    if Path::new("drillcheck.toml").exists() {
        println!("drillcheck.toml already exists, skipping.");
    } else {
        std::fs::write("drillcheck.toml", SAMPLE_CONFIG).context("failed to write drillcheck.toml")?;
        println!("Created drillcheck.toml");
    }

    std::fs::create_dir_all("challenges").context("failed to create challenges/")?;
    let example_path = Path::new("challenges/example.toml");
    if example_path.exists() {
        println!("challenges/example.toml already exists, skipping.");
    } else {
        std::fs::write(example_path, EXAMPLE_CHALLENGE_SET)
            .context("failed to write challenges/example.toml")?;
        println!("Created challenges/example.toml");
    }

    println!("\nNext steps:");
    println!("  1. Run: drillcheck validate --challenge-set challenges/example.toml");
    println!("  2. Run: drillcheck concept --challenge-set challenges/example.toml --id 1 --answer \"...\"");
    println!("  3. Set [semantic] enabled = true in drillcheck.toml to match paraphrases with Ollama");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# drillcheck configuration

[evaluation]
# Edit distance at which a misspelled key term still counts.
min_fuzzy_distance = 2

[evaluation.synonyms]
# lag = "latency"

[runner]
sqlite_binary = "sqlite3"
# python_binary = "python3"
sql_timeout_ms = 5000
python_timeout_ms = 2000
parallelism = 4
include_heavy = false
strict_identifiers = false
output_dir = "./drillcheck-results"

[semantic]
enabled = false
base_url = "http://localhost:11434"
model = "nomic-embed-text"
threshold = 0.74
"#;

const EXAMPLE_CHALLENGE_SET: &str = r#"[challenge_set]
id = "example"
name = "Example Challenges"
description = "One challenge of each kind to get started"

[[concept]]
id = 1
question = "What is an index and why does it speed up reads?"
solution = "An index is a sorted lookup structure that lets the database find rows without a full table scan, at the cost of slower writes."
key_terms = ["lookup", "full table scan", "writes"]

[[sql]]
id = 1
question = "List the names of products that cost more than 10."
solution = "SELECT name FROM products WHERE price > 10 ORDER BY name;"
expected_result = [["desk"], ["lamp"]]

[[sql.schema.tables]]
name = "products"
columns = [
    { name = "id", type = "INTEGER", pk = true },
    { name = "name", type = "TEXT" },
    { name = "price", type = "REAL" },
]

[sql.data]
products = [
    { id = 1, name = "pen", price = 2.5 },
    { id = 2, name = "lamp", price = 24.0 },
    { id = 3, name = "desk", price = 120.0 },
]

[[python]]
id = 1
question = "Print the sum of the numbers 1 to 10."
solution = "print(sum(range(1, 11)))"
expected_output = "55"
"#;
