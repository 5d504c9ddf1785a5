//! The `drillcheck grade` command.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use comfy_table::{Cell, Table};

use drillcheck_core::config::load_config_from;
use drillcheck_core::engine::{GradingConfig, GradingEngine, ProgressReporter, Submissions};
use drillcheck_core::model::ChallengeKind;
use drillcheck_core::report::{GradeOutcome, GradeReport, GradeSummary, OutcomeStatus};
use drillcheck_runner::engines_from_config;

use super::load_set;

/// Console progress reporter.
struct ConsoleReporter;

impl ProgressReporter for ConsoleReporter {
    fn on_grade_start(&self, kind: ChallengeKind, challenge_id: u32) {
        eprintln!("  Grading: {kind} {challenge_id}");
    }

    fn on_grade_complete(&self, outcome: &GradeOutcome) {
        eprintln!(
            "  Done: {} {} [{}] ({}ms)",
            outcome.kind, outcome.challenge_id, outcome.status, outcome.duration_ms
        );
    }

    fn on_set_complete(&self, summary: &GradeSummary, elapsed: Duration) {
        eprintln!(
            "\nComplete: {} passed, {} failed, {} errors, {} skipped ({:.1}s)",
            summary.passed,
            summary.failed,
            summary.errors,
            summary.skipped,
            elapsed.as_secs_f64()
        );
    }
}

pub async fn execute(
    challenge_set: PathBuf,
    submissions_path: PathBuf,
    output: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let set = load_set(&challenge_set)?;

    let content = std::fs::read_to_string(&submissions_path)
        .with_context(|| format!("failed to read {}", submissions_path.display()))?;
    let submissions: Submissions = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse submissions: {}", submissions_path.display()))?;

    let (sql, python) = engines_from_config(&config.runner);
    tracing::debug!(
        sqlite = sql.binary(),
        semantic = config.semantic.enabled,
        "grading engines configured"
    );
    let matcher = drillcheck_semantic::create_matcher(&config.semantic)?;
    let engine = GradingEngine::new(
        Arc::new(sql),
        Arc::new(python),
        matcher,
        GradingConfig::from_config(&config),
    );

    eprintln!(
        "drillcheck v{}: grading {} submission(s) against {} challenge(s)",
        env!("CARGO_PKG_VERSION"),
        submissions.len(),
        set.len()
    );
    eprintln!();

    let report = engine.grade_all(&set, &submissions, &ConsoleReporter).await?;
    print_summary(&report);

    let output = output.unwrap_or_else(|| config.runner.output_dir.clone());
    std::fs::create_dir_all(&output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H%M%S");
    let path = output.join(format!("grade-{timestamp}.json"));
    report.save_json(&path)?;
    eprintln!("Results saved to: {}", path.display());

    Ok(())
}

fn print_summary(report: &GradeReport) {
    let mut table = Table::new();
    table.set_header(vec!["Kind", "Id", "Status", "Score", "Message"]);

    for outcome in &report.outcomes {
        let score = outcome
            .score
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let mut message = first_line(&outcome.message).to_string();
        if !outcome.identifier_issues.is_empty() && outcome.status != OutcomeStatus::Failed {
            message.push_str(&format!(" ({} identifier issue(s))", outcome.identifier_issues.len()));
        }
        table.add_row(vec![
            Cell::new(outcome.kind),
            Cell::new(outcome.challenge_id),
            Cell::new(outcome.status),
            Cell::new(score),
            Cell::new(message),
        ]);
    }

    println!("{table}");
    println!(
        "Passed {}/{} graded ({:.1}%)",
        report.summary.passed,
        report.summary.total - report.summary.skipped,
        report.summary.pass_rate() * 100.0
    );
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or("")
}
