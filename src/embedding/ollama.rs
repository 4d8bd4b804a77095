use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, ProviderErrorKind};

use super::provider::EmbeddingProvider;

/// Ollama embedding provider (`/api/embed`).
#[derive(Debug)]
pub struct OllamaProvider {
    client: reqwest::Client,
    host: String,
    model: String,
    dimensions: usize,
    probe_timeout: Duration,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaProvider {
    pub fn new(
        host: String,
        model: String,
        dimensions: usize,
        timeout_ms: u64,
        probe_timeout_ms: u64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            client,
            host,
            model,
            dimensions,
            probe_timeout: Duration::from_millis(probe_timeout_ms),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    async fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/embed", self.host.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::provider(ProviderErrorKind::Timeout, e.to_string())
                } else {
                    Error::provider(ProviderErrorKind::Unavailable, e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider(
                ProviderErrorKind::Malformed,
                format!("ollama returned {status}: {body}"),
            ));
        }

        let parsed: EmbedResponse = response.json().await.map_err(|e| {
            Error::provider(ProviderErrorKind::Malformed, format!("bad response body: {e}"))
        })?;

        if parsed.embeddings.len() != texts.len() {
            return Err(Error::provider(
                ProviderErrorKind::Malformed,
                format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    parsed.embeddings.len()
                ),
            ));
        }

        debug!(count = texts.len(), model = %self.model, "embedded batch");
        Ok(parsed.embeddings)
    }

    async fn probe(&self) -> bool {
        let url = format!("{}/api/tags", self.host.trim_end_matches('/'));
        matches!(
            tokio::time::timeout(self.probe_timeout, self.client.get(&url).send()).await,
            Ok(Ok(response)) if response.status().is_success()
        )
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
