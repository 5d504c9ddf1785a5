//! Grade report types with JSON persistence.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::concept::ConceptEvaluationResult;
use crate::model::ChallengeKind;

/// How grading one challenge ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// The submission is correct.
    Passed,
    /// The submission ran (or was evaluated) and is wrong.
    Failed,
    /// The environment failed, e.g. the interpreter is missing.
    Error,
    /// Not graded: no submission, no expectation, or excluded.
    Skipped,
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeStatus::Passed => write!(f, "passed"),
            OutcomeStatus::Failed => write!(f, "failed"),
            OutcomeStatus::Error => write!(f, "error"),
            OutcomeStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Result of grading one challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeOutcome {
    pub kind: ChallengeKind,
    pub challenge_id: u32,
    pub status: OutcomeStatus,
    /// Concept score, when the challenge is conceptual.
    #[serde(default)]
    pub score: Option<u32>,
    pub message: String,
    /// Full concept evaluation, when the challenge is conceptual.
    #[serde(default)]
    pub concept: Option<ConceptEvaluationResult>,
    /// Identifier issues found before running a SQL submission.
    #[serde(default)]
    pub identifier_issues: Vec<String>,
    pub duration_ms: u64,
}

impl GradeOutcome {
    pub fn new(kind: ChallengeKind, challenge_id: u32, status: OutcomeStatus, message: impl Into<String>) -> Self {
        Self {
            kind,
            challenge_id,
            status,
            score: None,
            message: message.into(),
            concept: None,
            identifier_issues: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn skipped(kind: ChallengeKind, challenge_id: u32, reason: impl Into<String>) -> Self {
        Self::new(kind, challenge_id, OutcomeStatus::Skipped, reason)
    }
}

/// Summary of a challenge set (without the full challenge definitions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeSetSummary {
    pub id: String,
    pub name: String,
    pub challenge_count: usize,
}

/// Outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
}

impl GradeSummary {
    pub fn from_outcomes(outcomes: &[GradeOutcome]) -> Self {
        let mut summary = Self {
            total: outcomes.len(),
            ..Self::default()
        };
        for outcome in outcomes {
            match outcome.status {
                OutcomeStatus::Passed => summary.passed += 1,
                OutcomeStatus::Failed => summary.failed += 1,
                OutcomeStatus::Error => summary.errors += 1,
                OutcomeStatus::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    /// Share of graded (non-skipped) challenges that passed.
    pub fn pass_rate(&self) -> f64 {
        let graded = self.total - self.skipped;
        if graded == 0 {
            0.0
        } else {
            self.passed as f64 / graded as f64
        }
    }
}

/// A complete grading report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeReport {
    /// Unique report identifier.
    pub id: Uuid,
    /// When the report was created.
    pub created_at: DateTime<Utc>,
    pub challenge_set: ChallengeSetSummary,
    /// Outcomes ordered by challenge kind and id.
    pub outcomes: Vec<GradeOutcome>,
    pub summary: GradeSummary,
    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl GradeReport {
    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Load a report from a JSON file, validating embedded concept results.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        let report: GradeReport =
            serde_json::from_str(&content).context("failed to parse report JSON")?;
        report.validate()?;
        Ok(report)
    }

    /// Check every embedded concept result.
    pub fn validate(&self) -> Result<()> {
        for outcome in &self.outcomes {
            if let Some(result) = &outcome.concept {
                result.check_invariants().with_context(|| {
                    format!("invalid result for concept challenge {}", outcome.challenge_id)
                })?;
            }
        }
        Ok(())
    }

    /// Outcomes with the given status.
    pub fn with_status(&self, status: OutcomeStatus) -> impl Iterator<Item = &GradeOutcome> {
        self.outcomes.iter().filter(move |o| o.status == status)
    }
}
