//! drillcheck-semantic: Embedding-based semantic matching.
//!
//! Provides an Ollama embeddings client implementing the core
//! [`EmbeddingLayer`](drillcheck_core::semantic::EmbeddingLayer) trait, and
//! a factory that turns the `[semantic]` config section into a matcher for
//! the concept evaluator.

pub mod error;
pub mod mock;
pub mod ollama;

use std::sync::Arc;

use anyhow::Result;

use drillcheck_core::config::SemanticConfig;
use drillcheck_core::semantic::{EmbeddingMatcher, SemanticMatcher, UnavailableMatcher};

pub use error::EmbeddingError;
pub use ollama::OllamaEmbedder;

/// Build the matcher described by `config`.
///
/// A disabled config yields the unavailable matcher, which keeps evaluation
/// deterministic.
pub fn create_matcher(config: &SemanticConfig) -> Result<Arc<dyn SemanticMatcher>> {
    if !config.enabled {
        return Ok(Arc::new(UnavailableMatcher));
    }
    let embedder = OllamaEmbedder::new(&config.base_url, &config.model)?;
    tracing::debug!(model = embedder.model(), url = %config.base_url, "semantic matching enabled");
    Ok(Arc::new(
        EmbeddingMatcher::new(embedder).with_threshold(config.threshold),
    ))
}
