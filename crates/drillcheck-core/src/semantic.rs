//! Optional semantic matching of answer sentences against key terms.
//!
//! The concept evaluator accepts any [`SemanticMatcher`]. When no model is
//! configured, [`UnavailableMatcher`] stands in and reports itself unavailable
//! so evaluation stays purely deterministic.

use std::collections::HashMap;
use std::sync::LazyLock;

use anyhow::{ensure, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Similarity at or above which a sentence is accepted as covering a term.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.74;

static NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n+").unwrap());

/// Evidence that one sentence of an answer covers a key term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticMatch {
    pub term: String,
    pub similarity: f64,
    pub sentence: String,
}

/// Finds key terms that an answer covers by meaning rather than by wording.
#[async_trait]
pub trait SemanticMatcher: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Whether a model is loaded. Unavailable matchers are never invoked.
    fn is_available(&self) -> bool {
        true
    }

    /// Return the best match per term, sorted by similarity descending.
    async fn find_matches(&self, answer: &str, key_terms: &[String]) -> Result<Vec<SemanticMatch>>;
}

/// Null matcher used when no embedding model is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableMatcher;

#[async_trait]
impl SemanticMatcher for UnavailableMatcher {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn find_matches(&self, _answer: &str, _key_terms: &[String]) -> Result<Vec<SemanticMatch>> {
        Ok(Vec::new())
    }
}

/// Turns text into embedding vectors.
#[async_trait]
pub trait EmbeddingLayer: Send + Sync {
    fn name(&self) -> &str;

    /// Embed each input text. Returns one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// [`SemanticMatcher`] backed by an [`EmbeddingLayer`].
///
/// Each key term is embedded once through its explanation (or the term
/// itself when no explanation is registered) and cached for the lifetime of
/// the matcher. Answer sentences are embedded per call.
pub struct EmbeddingMatcher<E> {
    layer: E,
    explanations: HashMap<String, String>,
    threshold: f64,
    concept_vectors: Mutex<HashMap<String, Vec<f32>>>,
}

impl<E: EmbeddingLayer> EmbeddingMatcher<E> {
    pub fn new(layer: E) -> Self {
        Self {
            layer,
            explanations: HashMap::new(),
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            concept_vectors: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Register a short description embedded in place of the bare term.
    pub fn with_explanation(mut self, term: &str, explanation: &str) -> Self {
        self.explanations
            .insert(term.to_string(), explanation.to_string());
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    async fn vectors_for(&self, key_terms: &[String]) -> Result<Vec<(String, Vec<f32>)>> {
        let mut cache = self.concept_vectors.lock().await;

        let mut pending: Vec<String> = Vec::new();
        for term in key_terms {
            if !cache.contains_key(term) && !pending.contains(term) {
                pending.push(term.clone());
            }
        }

        if !pending.is_empty() {
            let texts: Vec<String> = pending
                .iter()
                .map(|t| self.explanations.get(t).cloned().unwrap_or_else(|| t.clone()))
                .collect();
            let vectors = self.layer.embed(&texts).await?;
            ensure!(
                vectors.len() == texts.len(),
                "{} returned {} vectors for {} concepts",
                self.layer.name(),
                vectors.len(),
                texts.len()
            );
            for (term, vector) in pending.into_iter().zip(vectors) {
                cache.insert(term, vector);
            }
        }

        Ok(key_terms
            .iter()
            .filter_map(|t| cache.get(t).map(|v| (t.clone(), v.clone())))
            .collect())
    }
}

#[async_trait]
impl<E: EmbeddingLayer> SemanticMatcher for EmbeddingMatcher<E> {
    fn name(&self) -> &str {
        self.layer.name()
    }

    async fn find_matches(&self, answer: &str, key_terms: &[String]) -> Result<Vec<SemanticMatch>> {
        let sentences = sentence_split(answer);
        if sentences.is_empty() || key_terms.is_empty() {
            return Ok(Vec::new());
        }

        let concepts = self.vectors_for(key_terms).await?;
        let sentence_vectors = self.layer.embed(&sentences).await?;
        ensure!(
            sentence_vectors.len() == sentences.len(),
            "{} returned {} vectors for {} sentences",
            self.layer.name(),
            sentence_vectors.len(),
            sentences.len()
        );

        let mut best: Vec<SemanticMatch> = Vec::new();
        for (sentence, vector) in sentences.iter().zip(&sentence_vectors) {
            for (term, concept) in &concepts {
                let similarity = cosine(vector, concept);
                if similarity < self.threshold {
                    continue;
                }
                match best.iter_mut().find(|m| &m.term == term) {
                    Some(existing) if similarity > existing.similarity => {
                        existing.similarity = similarity;
                        existing.sentence = sentence.clone();
                    }
                    Some(_) => {}
                    None => best.push(SemanticMatch {
                        term: term.clone(),
                        similarity,
                        sentence: sentence.clone(),
                    }),
                }
            }
        }

        best.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        tracing::debug!(matcher = self.name(), matches = best.len(), "semantic matching done");
        Ok(best)
    }
}

/// Cosine similarity. Returns 0 for empty, mismatched or zero-norm vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Split text into rough sentences at `.`, `!` or `?` followed by whitespace.
pub fn sentence_split(text: &str) -> Vec<String> {
    let flat = NEWLINES.replace_all(text, " ");
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = flat.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let ends_sentence = matches!(c, '.' | '!' | '?')
            && chars.peek().is_some_and(|next| next.is_whitespace());
        if ends_sentence {
            while chars.peek().is_some_and(|next| next.is_whitespace()) {
                chars.next();
            }
            push_trimmed(&mut sentences, &current);
            current.clear();
        }
    }
    push_trimmed(&mut sentences, &current);
    sentences
}

fn push_trimmed(out: &mut Vec<String>, sentence: &str) {
    let trimmed = sentence.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}
