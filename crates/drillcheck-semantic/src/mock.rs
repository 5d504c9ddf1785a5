//! Mock embedding layer for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use drillcheck_core::semantic::EmbeddingLayer;

/// An embedding layer returning fixed vectors, for tests without a server.
///
/// Texts are matched by lowercase substring against the registered keys;
/// unmatched texts get the default vector.
pub struct StaticEmbedder {
    vectors: Vec<(String, Vec<f32>)>,
    default_vector: Vec<f32>,
    call_count: AtomicU32,
    inputs: Mutex<Vec<String>>,
}

impl StaticEmbedder {
    pub fn new(default_vector: Vec<f32>) -> Self {
        Self {
            vectors: Vec::new(),
            default_vector,
            call_count: AtomicU32::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Return `vector` for any text containing `key`.
    pub fn with_vector(mut self, key: &str, vector: Vec<f32>) -> Self {
        self.vectors.push((key.to_lowercase(), vector));
        self
    }

    /// Get the number of embed calls made.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Every text embedded so far, in order.
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().map(|i| i.clone()).unwrap_or_default()
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        self.vectors
            .iter()
            .find(|(key, _)| lower.contains(key.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| self.default_vector.clone())
    }
}

#[async_trait]
impl EmbeddingLayer for StaticEmbedder {
    fn name(&self) -> &str {
        "static"
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.extend(texts.iter().cloned());
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_registered_vectors() {
        let embedder = StaticEmbedder::new(vec![0.0, 1.0]).with_vector("replica", vec![1.0, 0.0]);
        let vectors = embedder
            .embed(&["Replicas agree".to_string(), "unrelated".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(embedder.call_count(), 1);
        assert_eq!(embedder.inputs().len(), 2);
    }
}
