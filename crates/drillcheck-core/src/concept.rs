//! Deterministic scoring of free-text answers to conceptual questions.
//!
//! An answer is normalized and tokenized, synonyms are folded, and each key
//! term is classified as an exact, fuzzy or missing match. Coverage, accuracy
//! and clarity axes are combined with rubric weights into a 0-100 score.
//! An optional [`SemanticMatcher`] may promote missing terms afterwards.

use std::collections::{BTreeMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::semantic::{SemanticMatch, SemanticMatcher, UnavailableMatcher};
use crate::text::{levenshtein, normalize, tokenize};

/// Schema version written into every result.
pub const RESULT_VERSION: u32 = 1;

/// Default maximum edit distance for a fuzzy match.
pub const DEFAULT_FUZZY_DISTANCE: usize = 2;

/// Weight of a fuzzy match relative to an exact one on the accuracy axis.
const FUZZY_ACCURACY_WEIGHT: f64 = 0.6;

/// Number of extraneous tokens at which the clarity penalty saturates.
const EXTRANEOUS_SATURATION: f64 = 12.0;

/// Tokens of this length or shorter are never reported as extraneous.
const EXTRANEOUS_MIN_LEN: usize = 4;

/// Extraneous tokens listed in feedback.
const FEEDBACK_EXTRA_LIMIT: usize = 8;

fn default_synonyms() -> IndexMap<String, String> {
    [
        ("latency", "lag"),
        ("avail", "availability"),
        ("durable", "durability"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_misconceptions() -> IndexMap<String, String> {
    [
        (
            "acid",
            "ACID properties are unrelated to CAP tradeoffs directly; consider consistency, availability, partition tolerance.",
        ),
        ("eventual", "Clarify eventual vs strong consistency in CAP context."),
        (
            "ca",
            "In CAP you cannot simultaneously guarantee CA under partitions; revisit tradeoff.",
        ),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Relative weight of each scoring axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RubricWeights {
    pub completeness: f64,
    pub accuracy: f64,
    pub clarity: f64,
}

impl Default for RubricWeights {
    fn default() -> Self {
        Self {
            completeness: 0.5,
            accuracy: 0.3,
            clarity: 0.2,
        }
    }
}

impl RubricWeights {
    /// Build a weight triple, rejecting negative or non-finite weights and
    /// an all-zero triple.
    pub fn new(completeness: f64, accuracy: f64, clarity: f64) -> Result<Self, ModelError> {
        let weights = Self {
            completeness,
            accuracy,
            clarity,
        };
        weights.validate()?;
        Ok(weights)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        for (axis, w) in [
            ("completeness", self.completeness),
            ("accuracy", self.accuracy),
            ("clarity", self.clarity),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(ModelError::InvalidWeights(format!(
                    "{axis} weight must be a non-negative number, got {w}"
                )));
            }
        }
        if self.completeness + self.accuracy + self.clarity == 0.0 {
            return Err(ModelError::InvalidWeights("all weights are zero".into()));
        }
        Ok(())
    }
}

/// Caller overrides for evaluation. Every field is optional.
///
/// Synonyms and misconceptions are merged over the defaults, keeping default
/// entries first and caller entries in the order given; rubric weights
/// replace the default triple as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOptions {
    #[serde(default)]
    pub min_fuzzy_distance: Option<usize>,
    /// Variant to canonical form, e.g. `latency -> lag`.
    #[serde(default)]
    pub synonyms: IndexMap<String, String>,
    /// Trigger token to hint text.
    #[serde(default)]
    pub misconceptions: IndexMap<String, String>,
    #[serde(default)]
    pub rubric_weights: Option<RubricWeights>,
}

/// Options after merging over defaults.
#[derive(Debug, Clone)]
struct ResolvedOptions {
    fuzzy_distance: usize,
    synonyms: IndexMap<String, String>,
    misconceptions: IndexMap<String, String>,
    weights: RubricWeights,
}

impl EvaluationOptions {
    fn resolve(&self) -> ResolvedOptions {
        let mut synonyms = default_synonyms();
        synonyms.extend(self.synonyms.clone());
        let mut misconceptions = default_misconceptions();
        misconceptions.extend(self.misconceptions.clone());

        ResolvedOptions {
            fuzzy_distance: self.min_fuzzy_distance.unwrap_or(DEFAULT_FUZZY_DISTANCE),
            synonyms,
            misconceptions,
            weights: self.rubric_weights.unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// How a key term was found in the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermMatch {
    Exact,
    Fuzzy,
    Missing,
}

/// Reliability of a score, derived from the share of fuzzy matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn from_fuzzy_ratio(ratio: f64) -> Self {
        if ratio < 0.2 {
            ConfidenceBand::High
        } else if ratio < 0.5 {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }
}

impl std::fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfidenceBand::High => write!(f, "high"),
            ConfidenceBand::Medium => write!(f, "medium"),
            ConfidenceBand::Low => write!(f, "low"),
        }
    }
}

/// A trigger token found in the answer with its corrective hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Misconception {
    pub term: String,
    pub hint: String,
}

/// Per-axis scores and the weights used to combine them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreAxes {
    pub completeness: u32,
    pub accuracy: u32,
    pub clarity: u32,
    pub weights: RubricWeights,
}

/// Outcome of evaluating one answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptEvaluationResult {
    pub score: u32,
    pub covered: Vec<String>,
    pub missing: Vec<String>,
    pub extraneous: Vec<String>,
    pub feedback: String,
    pub detail: BTreeMap<String, TermMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub misconceptions: Option<Vec<Misconception>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axes: Option<ScoreAxes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_band: Option<ConfidenceBand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_matches: Option<Vec<SemanticMatch>>,
    pub evaluated_at: DateTime<Utc>,
    pub version: u32,
}

impl ConceptEvaluationResult {
    fn unscored(
        score: u32,
        missing: Vec<String>,
        feedback: impl Into<String>,
    ) -> Self {
        let detail = missing
            .iter()
            .map(|t| (t.clone(), TermMatch::Missing))
            .collect();
        Self {
            score,
            covered: Vec::new(),
            missing,
            extraneous: Vec::new(),
            feedback: feedback.into(),
            detail,
            misconceptions: None,
            axes: None,
            confidence_band: None,
            semantic_matches: None,
            evaluated_at: Utc::now(),
            version: RESULT_VERSION,
        }
    }

    /// Whether every key term was covered.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Validate a result that crossed a persistence boundary.
    pub fn check_invariants(&self) -> Result<(), ModelError> {
        let bad = |msg: String| Err(ModelError::MalformedResult(msg));

        if self.version != RESULT_VERSION {
            return bad(format!("unsupported version {}", self.version));
        }
        if self.score > 100 {
            return bad(format!("score {} out of range", self.score));
        }
        let covered: HashSet<&str> = self.covered.iter().map(String::as_str).collect();
        if let Some(term) = self.missing.iter().find(|t| covered.contains(t.as_str())) {
            return bad(format!("'{term}' is both covered and missing"));
        }
        for term in self.covered.iter().chain(&self.missing) {
            if !self.detail.contains_key(term) {
                return bad(format!("'{term}' has no detail entry"));
            }
        }
        for (term, state) in &self.detail {
            let in_covered = covered.contains(term.as_str());
            let in_missing = self.missing.contains(term);
            match state {
                TermMatch::Missing if !in_missing => {
                    return bad(format!("'{term}' is marked missing but not listed as missing"))
                }
                TermMatch::Exact | TermMatch::Fuzzy if !in_covered => {
                    return bad(format!("'{term}' is matched but not listed as covered"))
                }
                _ => {}
            }
        }
        if self.axes.is_some() != self.confidence_band.is_some() {
            return bad("axes and confidence band must be present together".into());
        }
        if let Some(axes) = &self.axes {
            if axes.completeness > 100 || axes.accuracy > 100 || axes.clarity > 100 {
                return bad("axis score out of range".into());
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate an answer without semantic matching.
///
/// Never fails: degenerate input yields a documented result and an internal
/// panic becomes a zero-score result whose feedback names the failure.
pub fn evaluate_deterministic(
    answer: &str,
    key_terms: &[String],
    options: &EvaluationOptions,
) -> ConceptEvaluationResult {
    match panic::catch_unwind(AssertUnwindSafe(|| score_answer(answer, key_terms, options))) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(error = %message, "concept evaluation failed");
            ConceptEvaluationResult::unscored(
                0,
                key_terms.to_vec(),
                format!("Evaluation error: {message}"),
            )
        }
    }
}

/// Evaluate an answer, then let `matcher` promote missing terms.
///
/// Semantic promotion moves a term from missing to covered and records the
/// evidence, but leaves the score and axes as computed deterministically.
/// Matcher errors and panics are logged and discarded.
pub async fn evaluate(
    answer: &str,
    key_terms: &[String],
    options: &EvaluationOptions,
    matcher: &dyn SemanticMatcher,
) -> ConceptEvaluationResult {
    let mut result = evaluate_deterministic(answer, key_terms, options);
    // Only scored results accept semantic evidence.
    if result.axes.is_none() || !matcher.is_available() {
        return result;
    }

    let terms = rubric_terms(key_terms);
    let outcome = AssertUnwindSafe(matcher.find_matches(answer, &terms))
        .catch_unwind()
        .await;
    let matches = match outcome {
        Ok(Ok(matches)) => matches,
        Ok(Err(e)) => {
            tracing::debug!(matcher = matcher.name(), error = %e, "semantic matching failed");
            return result;
        }
        Err(payload) => {
            tracing::debug!(
                matcher = matcher.name(),
                error = %panic_message(payload.as_ref()),
                "semantic matcher panicked"
            );
            return result;
        }
    };

    if !matches.is_empty() {
        apply_semantic_matches(&mut result, &matches);
        result.semantic_matches = Some(matches);
    }
    result
}

fn apply_semantic_matches(result: &mut ConceptEvaluationResult, matches: &[SemanticMatch]) {
    for m in matches {
        if result.detail.get(&m.term) == Some(&TermMatch::Missing) {
            result.detail.insert(m.term.clone(), TermMatch::Exact);
            if !result.covered.contains(&m.term) {
                result.covered.push(m.term.clone());
            }
            result.missing.retain(|t| t != &m.term);
        }
    }
}

/// Evaluator bundling options and a semantic matcher.
#[derive(Clone)]
pub struct ConceptEvaluator {
    options: EvaluationOptions,
    matcher: Arc<dyn SemanticMatcher>,
}

impl Default for ConceptEvaluator {
    fn default() -> Self {
        Self::new(EvaluationOptions::default())
    }
}

impl ConceptEvaluator {
    pub fn new(options: EvaluationOptions) -> Self {
        Self {
            options,
            matcher: Arc::new(UnavailableMatcher),
        }
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn SemanticMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn options(&self) -> &EvaluationOptions {
        &self.options
    }

    pub async fn evaluate(&self, answer: &str, key_terms: &[String]) -> ConceptEvaluationResult {
        evaluate(answer, key_terms, &self.options, self.matcher.as_ref()).await
    }
}

fn rubric_terms(key_terms: &[String]) -> Vec<String> {
    key_terms.iter().filter(|t| !t.is_empty()).cloned().collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown".to_string()
    }
}

fn score_answer(
    answer: &str,
    key_terms: &[String],
    options: &EvaluationOptions,
) -> ConceptEvaluationResult {
    let terms = rubric_terms(key_terms);

    if answer.trim().is_empty() {
        let feedback = if terms.is_empty() {
            "No rubric terms defined."
        } else {
            "Answer is empty. Provide an attempt to receive guidance."
        };
        return ConceptEvaluationResult::unscored(0, terms, feedback);
    }
    if terms.is_empty() {
        return ConceptEvaluationResult::unscored(
            100,
            Vec::new(),
            "No rubric terms provided; automatic full credit (authoring issue).",
        );
    }

    let opts = options.resolve();
    let normalized_answer = normalize(answer);

    let mut unique_tokens: Vec<String> = Vec::new();
    for token in tokenize(answer) {
        let token = opts.synonyms.get(&token).cloned().unwrap_or(token);
        if !unique_tokens.contains(&token) {
            unique_tokens.push(token);
        }
    }

    let mut detail = BTreeMap::new();
    let mut covered: Vec<String> = Vec::new();
    let (mut exact_count, mut fuzzy_count) = (0usize, 0usize);

    for term in &terms {
        let norm_term = normalize(term);
        let canonical = opts
            .synonyms
            .get(&norm_term)
            .cloned()
            .unwrap_or_else(|| norm_term.clone());

        let exact = unique_tokens.contains(&canonical)
            || unique_tokens.contains(&norm_term)
            || normalized_answer.contains(&norm_term)
            || normalized_answer.contains(&canonical);
        if exact {
            covered.push(term.clone());
            detail.insert(term.clone(), TermMatch::Exact);
            exact_count += 1;
            continue;
        }

        let term_len = norm_term.chars().count();
        let fuzzy = unique_tokens.iter().any(|token| {
            token.chars().count().abs_diff(term_len) <= opts.fuzzy_distance
                && levenshtein(token, &norm_term) <= opts.fuzzy_distance
        });
        if fuzzy {
            covered.push(term.clone());
            detail.insert(term.clone(), TermMatch::Fuzzy);
            fuzzy_count += 1;
        } else {
            detail.insert(term.clone(), TermMatch::Missing);
        }
    }

    let missing: Vec<String> = terms
        .iter()
        .filter(|t| !covered.contains(t))
        .cloned()
        .collect();
    let key_set: HashSet<String> = terms.iter().map(|t| normalize(t)).collect();
    let extraneous: Vec<String> = unique_tokens
        .iter()
        .filter(|t| t.chars().count() > EXTRANEOUS_MIN_LEN && !key_set.contains(*t))
        .cloned()
        .collect();
    let misconceptions: Vec<Misconception> = opts
        .misconceptions
        .iter()
        .filter(|(trigger, _)| unique_tokens.contains(trigger))
        .map(|(term, hint)| Misconception {
            term: term.clone(),
            hint: hint.clone(),
        })
        .collect();

    let total = terms.len() as f64;
    let covered_count = covered.len() as f64;
    let coverage_ratio = covered_count / total;
    let completeness = (coverage_ratio * 100.0).round();
    let (accuracy_ratio, fuzzy_ratio) = if covered.is_empty() {
        (0.0, 0.0)
    } else {
        (
            (exact_count as f64 + FUZZY_ACCURACY_WEIGHT * fuzzy_count as f64) / covered_count,
            fuzzy_count as f64 / covered_count,
        )
    };
    let accuracy = (accuracy_ratio * 100.0).round();
    let penalty = (extraneous.len() as f64 / EXTRANEOUS_SATURATION).min(1.0);
    let clarity = (100.0 * (1.0 - 0.5 * fuzzy_ratio - 0.5 * penalty)).round();
    let weights = opts.weights;
    let weighted = (completeness * weights.completeness
        + accuracy * weights.accuracy
        + clarity * weights.clarity)
        .round();
    let score = weighted.clamp(0.0, 100.0) as u32;

    let headline = if covered.len() == terms.len() {
        "Excellent coverage of all key concepts."
    } else if coverage_ratio >= 0.7 {
        "Good answer, most key concepts present. Refine for completeness."
    } else {
        "Several important concepts are missing, review the solution and try again."
    };
    let mut feedback = vec![headline.to_string()];
    if !missing.is_empty() {
        feedback.push(format!("Missing: {}", missing.join(", ")));
    }
    if !misconceptions.is_empty() {
        let names: Vec<&str> = misconceptions.iter().map(|m| m.term.as_str()).collect();
        feedback.push(format!("Potential misconceptions: {}", names.join(", ")));
    }
    if !extraneous.is_empty() {
        let shown: Vec<&str> = extraneous
            .iter()
            .take(FEEDBACK_EXTRA_LIMIT)
            .map(String::as_str)
            .collect();
        feedback.push(format!("Extra terms (verify relevance): {}", shown.join(", ")));
    }

    let mut covered_unique: Vec<String> = Vec::new();
    for term in covered {
        if !covered_unique.contains(&term) {
            covered_unique.push(term);
        }
    }

    ConceptEvaluationResult {
        score,
        covered: covered_unique,
        missing,
        extraneous,
        feedback: feedback.join(" "),
        detail,
        misconceptions: (!misconceptions.is_empty()).then_some(misconceptions),
        axes: Some(ScoreAxes {
            completeness: completeness as u32,
            accuracy: accuracy as u32,
            clarity: clarity as u32,
            weights,
        }),
        confidence_band: Some(ConfidenceBand::from_fuzzy_ratio(fuzzy_ratio)),
        semantic_matches: None,
        evaluated_at: Utc::now(),
        version: RESULT_VERSION,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use async_trait::async_trait;

    fn terms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn eval(answer: &str, key_terms: &[&str]) -> ConceptEvaluationResult {
        evaluate_deterministic(answer, &terms(key_terms), &EvaluationOptions::default())
    }

    struct FixedMatcher(Vec<SemanticMatch>);

    #[async_trait]
    impl SemanticMatcher for FixedMatcher {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn find_matches(&self, _: &str, _: &[String]) -> Result<Vec<SemanticMatch>> {
            Ok(self.0.clone())
        }
    }

    struct FailingMatcher;

    #[async_trait]
    impl SemanticMatcher for FailingMatcher {
        fn name(&self) -> &str {
            "failing"
        }

        async fn find_matches(&self, _: &str, _: &[String]) -> Result<Vec<SemanticMatch>> {
            bail!("model not loaded")
        }
    }

    struct PanickingMatcher;

    #[async_trait]
    impl SemanticMatcher for PanickingMatcher {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn find_matches(&self, _: &str, _: &[String]) -> Result<Vec<SemanticMatch>> {
            panic!("embedding index out of bounds")
        }
    }

    #[test]
    fn empty_answer_scores_zero() {
        let r = eval("   ", &["consistency", "availability"]);
        assert_eq!(r.score, 0);
        assert!(r.covered.is_empty());
        assert_eq!(r.missing, terms(&["consistency", "availability"]));
        assert_eq!(r.detail["consistency"], TermMatch::Missing);
        assert_eq!(
            r.feedback,
            "Answer is empty. Provide an attempt to receive guidance."
        );
        assert!(r.axes.is_none());
        r.check_invariants().unwrap();
    }

    #[test]
    fn empty_answer_without_terms() {
        let r = eval("", &[]);
        assert_eq!(r.score, 0);
        assert_eq!(r.feedback, "No rubric terms defined.");
    }

    #[test]
    fn no_key_terms_gives_full_credit() {
        let r = eval("Some thoughtful answer", &["", ""]);
        assert_eq!(r.score, 100);
        assert!(r.covered.is_empty());
        assert!(r.missing.is_empty());
        assert!(r.detail.is_empty());
        assert!(r.feedback.contains("automatic full credit"));
    }

    #[test]
    fn verbatim_terms_are_exact() {
        let r = eval(
            "Consistency and availability trade off under a network partition.",
            &["consistency", "availability", "partition"],
        );
        assert!(r.detail.values().all(|m| *m == TermMatch::Exact));
        let axes = r.axes.as_ref().unwrap();
        assert_eq!(axes.completeness, 100);
        assert_eq!(axes.accuracy, 100);
        assert!(r.missing.is_empty());
        assert_eq!(r.confidence_band, Some(ConfidenceBand::High));
        assert!(r.feedback.starts_with("Excellent coverage of all key concepts."));
        r.check_invariants().unwrap();
    }

    #[test]
    fn multi_word_term_matches_as_substring() {
        let r = eval("Systems need partition tolerance.", &["Partition Tolerance"]);
        assert_eq!(r.detail["Partition Tolerance"], TermMatch::Exact);
    }

    #[test]
    fn single_substitution_is_fuzzy() {
        let r = eval("we shard the dataset", &["shart"]);
        assert_eq!(r.detail["shart"], TermMatch::Fuzzy);
        assert_eq!(r.covered, terms(&["shart"]));
        let axes = r.axes.unwrap();
        assert_eq!(axes.completeness, 100);
        assert_eq!(axes.accuracy, 60);
        assert_eq!(r.confidence_band, Some(ConfidenceBand::Low));
    }

    #[test]
    fn fuzzy_respects_length_gap() {
        let options = EvaluationOptions {
            min_fuzzy_distance: Some(1),
            ..Default::default()
        };
        let r = evaluate_deterministic("replica", &terms(&["replication"]), &options);
        assert_eq!(r.detail["replication"], TermMatch::Missing);
    }

    #[test]
    fn synonyms_fold_tokens_and_terms() {
        // "latency" folds to "lag" on both sides.
        let r = eval("Network latency grows", &["lag"]);
        assert_eq!(r.detail["lag"], TermMatch::Exact);

        let options = EvaluationOptions {
            synonyms: IndexMap::from([("rows".to_string(), "records".to_string())]),
            ..Default::default()
        };
        let r = evaluate_deterministic("many rows", &terms(&["records", "durable"]), &options);
        assert_eq!(r.detail["records"], TermMatch::Exact);
        assert_eq!(r.detail["durable"], TermMatch::Missing);
    }

    #[test]
    fn acid_triggers_misconception() {
        let r = eval("Discussing acid and availability", &["availability"]);
        let hits = r.misconceptions.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].term, "acid");
        assert!(hits[0].hint.contains("CAP"));
        assert!(r.feedback.contains("Potential misconceptions: acid"));
    }

    #[test]
    fn caller_misconceptions_are_merged() {
        let options = EvaluationOptions {
            misconceptions: IndexMap::from([(
                "sharding".to_string(),
                "Sharding is not replication.".to_string(),
            )]),
            ..Default::default()
        };
        let r = evaluate_deterministic(
            "sharding gives eventual consistency",
            &terms(&["consistency"]),
            &options,
        );
        let hit_terms: Vec<String> = r
            .misconceptions
            .unwrap()
            .into_iter()
            .map(|m| m.term)
            .collect();
        assert_eq!(hit_terms, terms(&["eventual", "sharding"]));
    }

    #[test]
    fn misconceptions_follow_declaration_order() {
        let options = EvaluationOptions {
            misconceptions: IndexMap::from([
                ("zookeeper".to_string(), "ZooKeeper is a CP system.".to_string()),
                ("acid".to_string(), "ACID is about transactions.".to_string()),
                ("byzantine".to_string(), "CAP assumes crash faults.".to_string()),
            ]),
            ..Default::default()
        };
        let r = evaluate_deterministic(
            "byzantine zookeeper ca acid eventual",
            &terms(&["consistency"]),
            &options,
        );
        let hits = r.misconceptions.unwrap();
        let hit_terms: Vec<&str> = hits.iter().map(|m| m.term.as_str()).collect();
        assert_eq!(hit_terms, vec!["acid", "eventual", "ca", "zookeeper", "byzantine"]);
        assert_eq!(hits[0].hint, "ACID is about transactions.");
        assert!(r
            .feedback
            .contains("Potential misconceptions: acid, eventual, ca, zookeeper, byzantine"));
    }

    #[test]
    fn missing_terms_lower_score_and_feedback() {
        let r = eval("Consistency.", &["consistency", "availability", "partition"]);
        assert_eq!(r.missing, terms(&["availability", "partition"]));
        assert!(r
            .feedback
            .starts_with("Several important concepts are missing"));
        assert!(r.feedback.contains("Missing: availability, partition"));
        let axes = r.axes.as_ref().unwrap();
        assert_eq!(axes.completeness, 33);
        assert_eq!((axes.accuracy, axes.clarity), (100, 100));
        let expected = (33.0 * 0.5 + 100.0 * 0.3 + 100.0 * 0.2_f64).round() as u32;
        assert_eq!(r.score, expected);
    }

    #[test]
    fn mostly_covered_feedback() {
        let r = eval(
            "consistency availability partition",
            &["consistency", "availability", "partition", "quorum"],
        );
        assert!(r.feedback.starts_with("Good answer, most key concepts present."));
    }

    #[test]
    fn extraneous_tokens_penalize_clarity() {
        let answer = "consistency alpha1 bravo2 charlie3 delta4 echo55 foxtrot golf77 hotel8 india9 juliet kilo12 limas";
        let r = eval(answer, &["consistency"]);
        assert!(r.extraneous.len() >= 12);
        let axes = r.axes.as_ref().unwrap();
        assert_eq!(axes.clarity, 50);
        let listed = r
            .feedback
            .split("Extra terms (verify relevance): ")
            .nth(1)
            .unwrap();
        assert_eq!(listed.split(", ").count(), 8);
    }

    #[test]
    fn short_tokens_are_not_extraneous() {
        let r = eval("the cap of four", &["cap"]);
        assert!(r.extraneous.is_empty());
    }

    #[test]
    fn duplicate_terms_counted_but_reported_once() {
        let r = eval("consistency", &["consistency", "consistency", "availability"]);
        assert_eq!(r.covered, terms(&["consistency"]));
        assert_eq!(r.missing, terms(&["availability"]));
        // 2 of 3 covered.
        assert_eq!(r.axes.unwrap().completeness, 67);
    }

    #[test]
    fn rubric_weights_replace_defaults() {
        let options = EvaluationOptions {
            rubric_weights: Some(RubricWeights::new(1.0, 0.0, 0.0).unwrap()),
            ..Default::default()
        };
        let r = evaluate_deterministic(
            "consistency",
            &terms(&["consistency", "availability"]),
            &options,
        );
        assert_eq!(r.score, 50);
    }

    #[test]
    fn weights_are_validated() {
        assert!(RubricWeights::new(-0.1, 0.5, 0.5).is_err());
        assert!(RubricWeights::new(f64::NAN, 0.5, 0.5).is_err());
        assert!(RubricWeights::new(0.0, 0.0, 0.0).is_err());
        assert!(RubricWeights::new(0.0, 0.0, 1.0).is_ok());
    }

    #[test]
    fn confidence_band_thresholds() {
        assert_eq!(ConfidenceBand::from_fuzzy_ratio(0.0), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_fuzzy_ratio(0.19), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_fuzzy_ratio(0.2), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_fuzzy_ratio(0.5), ConfidenceBand::Low);
    }

    #[test]
    fn invariant_check_rejects_tampering() {
        let mut r = eval("consistency", &["consistency", "availability"]);
        r.check_invariants().unwrap();

        let mut overlap = r.clone();
        overlap.missing.push("consistency".into());
        assert!(overlap.check_invariants().is_err());

        r.score = 101;
        assert!(r.check_invariants().is_err());
    }

    #[test]
    fn result_json_uses_lowercase_labels() {
        let r = eval("consistency", &["consistency"]);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["detail"]["consistency"], "exact");
        assert_eq!(json["confidence_band"], "high");
        assert_eq!(json["version"], 1);
        assert!(json.get("semantic_matches").is_none());

        let back: ConceptEvaluationResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }

    #[tokio::test]
    async fn semantic_matches_promote_missing_terms() {
        let matcher = FixedMatcher(vec![
            SemanticMatch {
                term: "partition tolerance".into(),
                similarity: 0.81,
                sentence: "The system keeps working when the network splits.".into(),
            },
            SemanticMatch {
                term: "consistency".into(),
                similarity: 0.9,
                sentence: "irrelevant".into(),
            },
        ]);
        let key_terms = terms(&["consistency", "partition tolerance"]);
        let deterministic =
            evaluate_deterministic("Consistency matters. It keeps working.", &key_terms, &EvaluationOptions::default());
        let r = evaluate(
            "Consistency matters. It keeps working.",
            &key_terms,
            &EvaluationOptions::default(),
            &matcher,
        )
        .await;

        assert_eq!(r.detail["partition tolerance"], TermMatch::Exact);
        assert_eq!(r.covered, key_terms);
        assert!(r.missing.is_empty());
        assert_eq!(r.semantic_matches.as_ref().unwrap().len(), 2);
        // Score stays as computed deterministically.
        assert_eq!(r.score, deterministic.score);
        r.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn matcher_failures_are_swallowed() {
        let key_terms = terms(&["consistency", "availability"]);
        let opts = EvaluationOptions::default();

        let r = evaluate("consistency only", &key_terms, &opts, &FailingMatcher).await;
        assert_eq!(r.missing, terms(&["availability"]));
        assert!(r.semantic_matches.is_none());

        let r = evaluate("consistency only", &key_terms, &opts, &PanickingMatcher).await;
        assert_eq!(r.missing, terms(&["availability"]));
        assert!(r.semantic_matches.is_none());
    }

    #[tokio::test]
    async fn evaluator_defaults_to_unavailable_matcher() {
        let evaluator = ConceptEvaluator::default();
        let r = evaluator
            .evaluate("consistency", &terms(&["consistency"]))
            .await;
        assert_eq!(r.score, 100);
        assert!(r.semantic_matches.is_none());
    }

    #[test]
    fn panic_message_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown");
    }
}
