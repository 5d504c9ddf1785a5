//! The `drillcheck concept` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use drillcheck_core::concept::{ConceptEvaluationResult, ConceptEvaluator};
use drillcheck_core::config::load_config_from;
use drillcheck_core::review::{JsonFileStore, ReviewScheduler};

use super::load_set;

pub async fn execute(
    challenge_set: PathBuf,
    id: u32,
    answer: Option<String>,
    answer_file: Option<PathBuf>,
    format: String,
    review_store: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let set = load_set(&challenge_set)?;
    let challenge = set
        .concept(id)
        .with_context(|| format!("no concept challenge {id} in {}", set.id))?;

    let answer = match (answer, answer_file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read answer from {}", path.display()))?,
        (None, None) => anyhow::bail!("provide --answer or --answer-file"),
    };

    let matcher = drillcheck_semantic::create_matcher(&config.semantic)?;
    let evaluator = ConceptEvaluator::new(config.evaluation.clone()).with_matcher(matcher);
    let result = evaluator.evaluate(&answer, &challenge.key_terms).await;

    if let Some(path) = review_store {
        let scheduler = ReviewScheduler::new(JsonFileStore::new(&path));
        scheduler.record_missed(&result.missing, result.evaluated_at);
        scheduler.record_covered(&result.covered, result.evaluated_at);
        tracing::debug!(
            store = %path.display(),
            missed = result.missing.len(),
            "review schedule updated"
        );
    }

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text(&challenge.question, &result),
    }

    Ok(())
}

fn print_text(question: &str, result: &ConceptEvaluationResult) {
    println!("Question: {question}");
    println!("Score: {}/100", result.score);
    if let Some(axes) = &result.axes {
        println!(
            "  completeness {}  accuracy {}  clarity {}",
            axes.completeness, axes.accuracy, axes.clarity
        );
    }
    println!("Covered: {}", join_or_dash(&result.covered));
    println!("Missing: {}", join_or_dash(&result.missing));
    if !result.extraneous.is_empty() {
        println!("Extraneous: {}", result.extraneous.join(", "));
    }
    if let Some(band) = result.confidence_band {
        println!("Confidence: {band}");
    }
    if let Some(matches) = &result.semantic_matches {
        for m in matches {
            println!("  ~ {} ({:.2})", m.term, m.similarity);
        }
    }
    if let Some(misconceptions) = &result.misconceptions {
        println!("\nMisconceptions:");
        for m in misconceptions {
            println!("  {}: {}", m.term, m.hint);
        }
    }
    println!("\n{}", result.feedback);
}

fn join_or_dash(terms: &[String]) -> String {
    if terms.is_empty() {
        "-".to_string()
    } else {
        terms.join(", ")
    }
}
