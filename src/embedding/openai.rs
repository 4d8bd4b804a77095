use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, ProviderErrorKind};

use super::provider::EmbeddingProvider;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";

/// OpenAI-compatible embedding provider. Also serves custom endpoints that
/// speak the same wire format.
#[derive(Debug)]
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimensions: usize,
    endpoint: String,
    probe_timeout: Duration,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

impl OpenAIProvider {
    pub fn new(
        api_key: String,
        model: String,
        dimensions: usize,
        endpoint: Option<String>,
        timeout_ms: u64,
        probe_timeout_ms: u64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            model,
            dimensions,
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            probe_timeout: Duration::from_millis(probe_timeout_ms),
        }
    }

    fn classify(e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::provider(ProviderErrorKind::Timeout, e.to_string())
        } else if e.is_connect() {
            Error::provider(ProviderErrorKind::Unavailable, e.to_string())
        } else {
            Error::provider(ProviderErrorKind::Malformed, e.to_string())
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    async fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await
            .map_err(Self::classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider(
                ProviderErrorKind::Malformed,
                format!("embeddings endpoint returned {status}: {body}"),
            ));
        }

        let parsed: EmbeddingsResponse = response.json().await.map_err(|e| {
            Error::provider(ProviderErrorKind::Malformed, format!("bad response body: {e}"))
        })?;

        if parsed.data.len() != texts.len() {
            return Err(Error::provider(
                ProviderErrorKind::Malformed,
                format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    parsed.data.len()
                ),
            ));
        }

        debug!(count = texts.len(), model = %self.model, "embedded batch");
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    async fn probe(&self) -> bool {
        // Any HTTP response counts as reachable, including 401; only network
        // failures and timeouts mean unavailable.
        let url = format!("{}/models", self.endpoint.trim_end_matches('/'));
        matches!(
            tokio::time::timeout(self.probe_timeout, self.client.get(&url).send()).await,
            Ok(Ok(_))
        )
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "openai"
    }
}
