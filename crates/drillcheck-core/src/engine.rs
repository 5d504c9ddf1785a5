//! Batch grading orchestrator.
//!
//! Grades the submissions for a challenge set with bounded parallelism and
//! collects the outcomes into a [`GradeReport`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::compare::{compare_output, compare_tabular, match_output_pattern, ComparisonVerdict};
use crate::concept::{ConceptEvaluator, EvaluationOptions};
use crate::config::DrillcheckConfig;
use crate::error::ExecutionError;
use crate::model::{ChallengeKind, ChallengeSet, ConceptChallenge, PythonChallenge, SqlChallenge};
use crate::report::{ChallengeSetSummary, GradeOutcome, GradeReport, GradeSummary, OutcomeStatus};
use crate::semantic::SemanticMatcher;
use crate::sql::{HeuristicResolver, IdentifierResolver};
use crate::traits::{PythonEngine, PythonRequest, SqlEngine, SqlRequest};

/// Configuration for the grading engine.
#[derive(Debug, Clone)]
pub struct GradingConfig {
    /// Maximum concurrent gradings.
    pub parallelism: usize,
    pub sql_timeout_ms: u64,
    pub python_timeout_ms: u64,
    /// Grade Python challenges marked heavy.
    pub include_heavy: bool,
    /// Fail SQL submissions with identifier issues before running them.
    pub strict_identifiers: bool,
    /// Absolute tolerance for numeric cells.
    pub tolerance: f64,
    pub evaluation: EvaluationOptions,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self::from_config(&DrillcheckConfig::default())
    }
}

impl GradingConfig {
    pub fn from_config(config: &DrillcheckConfig) -> Self {
        Self {
            parallelism: config.runner.parallelism.max(1),
            sql_timeout_ms: config.runner.sql_timeout_ms,
            python_timeout_ms: config.runner.python_timeout_ms,
            include_heavy: config.runner.include_heavy,
            strict_identifiers: config.runner.strict_identifiers,
            tolerance: config.runner.tolerance,
            evaluation: config.evaluation.clone(),
        }
    }
}

/// Submitted answers keyed by challenge id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Submissions {
    #[serde(default)]
    pub concept: BTreeMap<u32, String>,
    #[serde(default)]
    pub sql: BTreeMap<u32, String>,
    #[serde(default)]
    pub python: BTreeMap<u32, String>,
}

impl Submissions {
    pub fn len(&self) -> usize {
        self.concept.len() + self.sql.len() + self.python.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Progress reporting trait.
pub trait ProgressReporter: Send + Sync {
    fn on_grade_start(&self, kind: ChallengeKind, challenge_id: u32);
    fn on_grade_complete(&self, outcome: &GradeOutcome);
    fn on_set_complete(&self, summary: &GradeSummary, elapsed: Duration);
}

/// No-op progress reporter.
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_grade_start(&self, _: ChallengeKind, _: u32) {}
    fn on_grade_complete(&self, _: &GradeOutcome) {}
    fn on_set_complete(&self, _: &GradeSummary, _: Duration) {}
}

enum Job<'a> {
    Concept(&'a ConceptChallenge, &'a str),
    Sql(&'a SqlChallenge, &'a str),
    Python(&'a PythonChallenge, &'a str),
}

impl Job<'_> {
    fn key(&self) -> (ChallengeKind, u32) {
        match self {
            Job::Concept(c, _) => (ChallengeKind::Concept, c.id),
            Job::Sql(c, _) => (ChallengeKind::Sql, c.id),
            Job::Python(c, _) => (ChallengeKind::Python, c.id),
        }
    }
}

/// The grading engine.
pub struct GradingEngine {
    sql: Arc<dyn SqlEngine>,
    python: Arc<dyn PythonEngine>,
    evaluator: ConceptEvaluator,
    resolver: Arc<dyn IdentifierResolver>,
    config: GradingConfig,
}

impl GradingEngine {
    pub fn new(
        sql: Arc<dyn SqlEngine>,
        python: Arc<dyn PythonEngine>,
        matcher: Arc<dyn SemanticMatcher>,
        config: GradingConfig,
    ) -> Self {
        let evaluator = ConceptEvaluator::new(config.evaluation.clone()).with_matcher(matcher);
        Self {
            sql,
            python,
            evaluator,
            resolver: Arc::new(HeuristicResolver),
            config,
        }
    }

    /// Replace the identifier resolver used before running SQL.
    pub fn with_resolver(mut self, resolver: Arc<dyn IdentifierResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &GradingConfig {
        &self.config
    }

    /// Evaluate a conceptual answer. Passes when every key term is covered.
    pub async fn grade_concept(&self, challenge: &ConceptChallenge, answer: &str) -> GradeOutcome {
        let start = Instant::now();
        let result = self.evaluator.evaluate(answer, &challenge.key_terms).await;
        let status = if result.is_complete() {
            OutcomeStatus::Passed
        } else {
            OutcomeStatus::Failed
        };
        let mut outcome = GradeOutcome::new(ChallengeKind::Concept, challenge.id, status, &result.feedback);
        outcome.score = Some(result.score);
        outcome.concept = Some(result);
        outcome.duration_ms = start.elapsed().as_millis() as u64;
        outcome
    }

    /// Validate identifiers, run the query and compare its rows.
    pub async fn grade_sql(&self, challenge: &SqlChallenge, query: &str) -> GradeOutcome {
        let start = Instant::now();
        let mut outcome = self.grade_sql_inner(challenge, query).await;
        outcome.duration_ms = start.elapsed().as_millis() as u64;
        outcome
    }

    async fn grade_sql_inner(&self, challenge: &SqlChallenge, query: &str) -> GradeOutcome {
        let kind = ChallengeKind::Sql;
        let tables = challenge.tables();
        let issues = self.resolver.resolve(query, &tables).issues;

        if self.config.strict_identifiers && !issues.is_empty() {
            let mut outcome = GradeOutcome::new(
                kind,
                challenge.id,
                OutcomeStatus::Failed,
                format!("Identifier issues: {}", issues.join("; ")),
            );
            outcome.identifier_issues = issues;
            return outcome;
        }
        if !issues.is_empty() {
            tracing::debug!(challenge = challenge.id, ?issues, "identifier issues (non-strict)");
        }

        let request = SqlRequest {
            tables: challenge
                .schema
                .as_ref()
                .map(|s| s.tables.clone())
                .unwrap_or_default(),
            data: challenge.data.clone(),
            sql: query.to_string(),
            timeout_ms: self.config.sql_timeout_ms,
        };

        let mut outcome = match self.sql.execute(&request).await {
            Err(e) => execution_failure(kind, challenge.id, &e),
            Ok(result) => match &challenge.expected_result {
                None => GradeOutcome::new(
                    kind,
                    challenge.id,
                    OutcomeStatus::Passed,
                    "No expected result declared; query ran successfully",
                ),
                Some(expected) => {
                    let ordering = challenge.schema.as_ref().and_then(|s| s.ordering());
                    let verdict = compare_tabular(expected, &result, ordering, self.config.tolerance);
                    verdict_outcome(kind, challenge.id, verdict)
                }
            },
        };
        outcome.identifier_issues = issues;
        outcome
    }

    /// Run a script and compare its captured output.
    pub async fn grade_python(&self, challenge: &PythonChallenge, code: &str) -> GradeOutcome {
        let kind = ChallengeKind::Python;
        if challenge.skip_verification {
            return GradeOutcome::skipped(kind, challenge.id, "Verification disabled for this challenge");
        }
        if challenge.expected_output.is_none() && challenge.expected_pattern.is_none() {
            return GradeOutcome::skipped(kind, challenge.id, "No expected output declared");
        }
        if challenge.heavy && !self.config.include_heavy {
            return GradeOutcome::skipped(kind, challenge.id, "Heavy challenge excluded from this run");
        }

        let start = Instant::now();
        let request = PythonRequest {
            code: code.to_string(),
            data: challenge.data.clone(),
            timeout_ms: self.config.python_timeout_ms,
        };
        let mut outcome = match self.python.run(&request).await {
            Err(e) => execution_failure(kind, challenge.id, &e),
            Ok(output) => {
                let verdict = match (&challenge.expected_pattern, &challenge.expected_output) {
                    (Some(pattern), _) => match_output_pattern(&output.stdout, pattern),
                    (None, Some(expected)) => {
                        compare_output(&output.stdout, expected, challenge.strict_comparison)
                    }
                    (None, None) => ComparisonVerdict::pass("Nothing to compare"),
                };
                verdict_outcome(kind, challenge.id, verdict)
            }
        };
        outcome.duration_ms = start.elapsed().as_millis() as u64;
        outcome
    }

    /// Grade every challenge in `set` against `submissions`.
    ///
    /// Challenges without a submission are reported as skipped. Submissions
    /// for unknown challenge ids are ignored with a warning.
    pub async fn grade_all(
        &self,
        set: &ChallengeSet,
        submissions: &Submissions,
        progress: &dyn ProgressReporter,
    ) -> Result<GradeReport> {
        let start = Instant::now();
        let report_id = Uuid::new_v4();
        warn_unknown_ids(set, submissions);

        let mut outcomes = Vec::with_capacity(set.len());
        let mut jobs = Vec::new();

        for c in &set.concept {
            match submissions.concept.get(&c.id) {
                Some(answer) => jobs.push(Job::Concept(c, answer.as_str())),
                None => outcomes.push(GradeOutcome::skipped(ChallengeKind::Concept, c.id, "No submission")),
            }
        }
        for c in &set.sql {
            match submissions.sql.get(&c.id) {
                Some(query) => jobs.push(Job::Sql(c, query.as_str())),
                None => outcomes.push(GradeOutcome::skipped(ChallengeKind::Sql, c.id, "No submission")),
            }
        }
        for c in &set.python {
            match submissions.python.get(&c.id) {
                Some(code) => jobs.push(Job::Python(c, code.as_str())),
                None => outcomes.push(GradeOutcome::skipped(ChallengeKind::Python, c.id, "No submission")),
            }
        }

        let semaphore = Semaphore::new(self.config.parallelism.max(1));
        let semaphore = &semaphore;
        let mut futures = FuturesUnordered::new();

        for job in jobs {
            futures.push(async move {
                let (kind, id) = job.key();
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return GradeOutcome::new(kind, id, OutcomeStatus::Error, "semaphore closed");
                    }
                };
                progress.on_grade_start(kind, id);
                match job {
                    Job::Concept(c, answer) => self.grade_concept(c, answer).await,
                    Job::Sql(c, query) => self.grade_sql(c, query).await,
                    Job::Python(c, code) => self.grade_python(c, code).await,
                }
            });
        }

        while let Some(outcome) = futures.next().await {
            if outcome.status == OutcomeStatus::Error {
                tracing::error!(
                    kind = %outcome.kind,
                    challenge = outcome.challenge_id,
                    "grading failed: {}",
                    outcome.message
                );
            }
            progress.on_grade_complete(&outcome);
            outcomes.push(outcome);
        }

        outcomes.sort_by_key(|o| (o.kind, o.challenge_id));
        let summary = GradeSummary::from_outcomes(&outcomes);
        let elapsed = start.elapsed();
        progress.on_set_complete(&summary, elapsed);

        Ok(GradeReport {
            id: report_id,
            created_at: chrono::Utc::now(),
            challenge_set: ChallengeSetSummary {
                id: set.id.clone(),
                name: set.name.clone(),
                challenge_count: set.len(),
            },
            outcomes,
            summary,
            duration_ms: elapsed.as_millis() as u64,
        })
    }
}

fn verdict_outcome(kind: ChallengeKind, id: u32, verdict: ComparisonVerdict) -> GradeOutcome {
    let status = if verdict.is_correct {
        OutcomeStatus::Passed
    } else {
        OutcomeStatus::Failed
    };
    GradeOutcome::new(kind, id, status, verdict.message)
}

/// Submission faults fail the challenge; environment faults are errors.
fn execution_failure(kind: ChallengeKind, id: u32, error: &anyhow::Error) -> GradeOutcome {
    let status = match error.downcast_ref::<ExecutionError>() {
        Some(e) if e.is_user_error() => OutcomeStatus::Failed,
        _ => OutcomeStatus::Error,
    };
    GradeOutcome::new(kind, id, status, format!("{error:#}"))
}

fn warn_unknown_ids(set: &ChallengeSet, submissions: &Submissions) {
    for id in submissions.concept.keys().filter(|id| set.concept(**id).is_none()) {
        tracing::warn!("no concept challenge {id} in '{}', ignoring submission", set.id);
    }
    for id in submissions.sql.keys().filter(|id| set.sql(**id).is_none()) {
        tracing::warn!("no sql challenge {id} in '{}', ignoring submission", set.id);
    }
    for id in submissions.python.keys().filter(|id| set.python(**id).is_none()) {
        tracing::warn!("no python challenge {id} in '{}', ignoring submission", set.id);
    }
}
