use async_trait::async_trait;

use crate::config::{Config, EmbeddingProviderType};
use crate::error::{Error, ProviderErrorKind};

use super::mock::MockProvider;
use super::ollama::OllamaProvider;
use super::openai::OpenAIProvider;

/// Trait for embedding text into vector representations.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    /// Embed a batch of texts, returning one vector per input.
    async fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>>;

    /// Cheap reachability check under a bounded timeout. `false` means
    /// semantic callers should fall back to keyword search.
    async fn probe(&self) -> bool;

    /// The dimensionality of the embedding vectors produced.
    fn dimensions(&self) -> usize;

    /// Human-readable name for this provider.
    fn name(&self) -> &str;
}

/// Create an embedding provider from the configuration, or `None` when no
/// provider is configured. The engine functions fully without one.
pub fn create_provider(config: &Config) -> crate::Result<Option<Box<dyn EmbeddingProvider>>> {
    let Some(provider_type) = config.embedding_provider else {
        return Ok(None);
    };

    let provider: Box<dyn EmbeddingProvider> = match provider_type {
        EmbeddingProviderType::OpenAI => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                Error::provider(
                    ProviderErrorKind::Unavailable,
                    "openai provider requires OPENAI_API_KEY to be set",
                )
            })?;
            Box::new(OpenAIProvider::new(
                api_key,
                config.embedding_model.clone(),
                config.embedding_dimensions,
                config.embedding_endpoint.clone(),
                config.provider_timeout_ms,
                config.probe_timeout_ms,
            ))
        }
        EmbeddingProviderType::Ollama => Box::new(OllamaProvider::new(
            config.ollama_host.clone(),
            config.embedding_model.clone(),
            config.embedding_dimensions,
            config.provider_timeout_ms,
            config.probe_timeout_ms,
        )),
        EmbeddingProviderType::Custom => {
            let endpoint = config.embedding_endpoint.clone().ok_or_else(|| {
                Error::provider(
                    ProviderErrorKind::Unavailable,
                    "custom provider requires ENGRAM_EMBEDDING_ENDPOINT to be set",
                )
            })?;
            Box::new(OpenAIProvider::new(
                config.openai_api_key.clone().unwrap_or_default(),
                config.embedding_model.clone(),
                config.embedding_dimensions,
                Some(endpoint),
                config.provider_timeout_ms,
                config.probe_timeout_ms,
            ))
        }
        EmbeddingProviderType::Mock => Box::new(MockProvider::new(config.embedding_dimensions)),
    };

    Ok(Some(provider))
}
