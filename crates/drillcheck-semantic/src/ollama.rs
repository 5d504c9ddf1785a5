//! Ollama embeddings client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use drillcheck_core::semantic::EmbeddingLayer;

use crate::error::EmbeddingError;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "nomic-embed-text";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Embedding layer served by a local Ollama instance.
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str) -> anyhow::Result<Self> {
        let base = if base_url.is_empty() {
            DEFAULT_BASE_URL
        } else {
            base_url
        };
        let model = if model.is_empty() { DEFAULT_MODEL } else { model };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| EmbeddingError::NetworkError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingLayer for OllamaEmbedder {
    fn name(&self) -> &str {
        "ollama"
    }

    #[instrument(skip(self, texts), fields(model = %self.model, inputs = texts.len()))]
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbeddingError::Timeout(DEFAULT_TIMEOUT_SECS)
                } else if e.is_connect() {
                    EmbeddingError::NetworkError(format!(
                        "Ollama not reachable at {}. Is it running? Start with: ollama serve",
                        self.base_url
                    ))
                } else {
                    EmbeddingError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status == 404 {
            return Err(EmbeddingError::ModelNotFound(format!(
                "Model '{}' not found locally. Pull it with: ollama pull {}",
                self.model, self.model
            ))
            .into());
        }
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ApiError {
                status,
                message: body,
            }
            .into());
        }

        let api_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::MalformedResponse(format!("failed to parse response: {e}")))?;

        if api_response.embeddings.len() != texts.len() {
            return Err(EmbeddingError::MalformedResponse(format!(
                "expected {} vectors, got {}",
                texts.len(),
                api_response.embeddings.len()
            ))
            .into());
        }
        Ok(api_response.embeddings)
    }
}
