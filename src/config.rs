use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::error::Error;
use crate::scope;

/// Supported embedding provider backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderType {
    OpenAI,
    Ollama,
    Custom,
    Mock,
}

impl FromStr for EmbeddingProviderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            "custom" => Ok(Self::Custom),
            "mock" => Ok(Self::Mock),
            other => Err(Error::Invalid(format!(
                "unknown embedding provider '{other}': expected openai, ollama, custom, or mock"
            ))),
        }
    }
}

/// Full configuration, loaded from environment / `.engram/config` / `.env` / defaults.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Root directory for the global scope.
    pub home_root: PathBuf,
    /// Root directory for the enterprise scope; unset means the scope is unavailable.
    pub enterprise_root: Option<PathBuf>,
    /// Embedding provider; unset means keyword-only search.
    pub embedding_provider: Option<EmbeddingProviderType>,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,
    pub ollama_host: String,
    pub embedding_endpoint: Option<String>,
    pub search_limit: usize,
    /// Minimum cosine similarity for semantic search results.
    pub search_threshold: f64,
    /// Minimum cosine similarity for hook-injection candidates.
    pub inject_threshold: f64,
    /// Breadcrumbs untouched for this many days are eligible for prune.
    pub prune_max_age_days: i64,
    pub lease_timeout_ms: u64,
    pub provider_timeout_ms: u64,
    pub probe_timeout_ms: u64,
}

impl Config {
    /// Load configuration with priority: shell env > `<project>/.engram/config`
    /// > `<project>/.env` > built-in defaults.
    ///
    /// dotenvy never overrides variables already present in the environment,
    /// so loading the project config first gives it priority over `.env`.
    pub fn load(cwd: &Path) -> Result<Self, Error> {
        if let Some(project_root) = scope::find_project_root(cwd) {
            let _ = dotenvy::from_path(project_root.join(".engram").join("config"));
            let _ = dotenvy::from_path(project_root.join(".env"));
        }

        let home_root = match std::env::var("ENGRAM_HOME") {
            Ok(v) if !v.trim().is_empty() => PathBuf::from(v),
            _ => dirs::home_dir()
                .map(|h| h.join(".engram").join("global"))
                .ok_or_else(|| Error::Invalid("cannot resolve home directory".into()))?,
        };

        let enterprise_root = std::env::var("ENGRAM_ENTERPRISE_ROOT")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let embedding_provider = match std::env::var("ENGRAM_EMBEDDING_PROVIDER") {
            Ok(v) if !v.trim().is_empty() => Some(v.parse::<EmbeddingProviderType>()?),
            _ => None,
        };

        let config = Self {
            home_root,
            enterprise_root,
            embedding_provider,
            embedding_model: env_or_default("ENGRAM_EMBEDDING_MODEL", "text-embedding-3-small"),
            embedding_dimensions: parse_env::<usize>("ENGRAM_EMBEDDING_DIMENSIONS", 1536)?,
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            ollama_host: env_or_default("OLLAMA_HOST", "http://localhost:11434"),
            embedding_endpoint: std::env::var("ENGRAM_EMBEDDING_ENDPOINT").ok(),
            search_limit: parse_env::<usize>("ENGRAM_SEARCH_LIMIT", 10)?,
            search_threshold: parse_env::<f64>("ENGRAM_SEARCH_THRESHOLD", 0.45)?,
            inject_threshold: parse_env::<f64>("ENGRAM_INJECT_THRESHOLD", 0.4)?,
            prune_max_age_days: parse_env::<i64>("ENGRAM_PRUNE_MAX_AGE_DAYS", 7)?,
            lease_timeout_ms: parse_env::<u64>("ENGRAM_LEASE_TIMEOUT_MS", 5000)?,
            provider_timeout_ms: parse_env::<u64>("ENGRAM_PROVIDER_TIMEOUT_MS", 30_000)?,
            probe_timeout_ms: parse_env::<u64>("ENGRAM_PROBE_TIMEOUT_MS", 2000)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate constraint invariants on the loaded config.
    fn validate(&self) -> Result<(), Error> {
        if self.embedding_dimensions == 0 {
            return Err(Error::Invalid("embedding_dimensions must be > 0".into()));
        }
        if self.search_limit == 0 {
            return Err(Error::Invalid("search_limit must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.search_threshold) {
            return Err(Error::Invalid(format!(
                "search_threshold ({}) must be in [0.0, 1.0]",
                self.search_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.inject_threshold) {
            return Err(Error::Invalid(format!(
                "inject_threshold ({}) must be in [0.0, 1.0]",
                self.inject_threshold
            )));
        }
        if self.prune_max_age_days < 0 {
            return Err(Error::Invalid("prune_max_age_days must be >= 0".into()));
        }
        if self.lease_timeout_ms == 0 {
            return Err(Error::Invalid("lease_timeout_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// Read an env var or return a default string value.
fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an env var into a typed value, using a default if not set.
fn parse_env<T>(key: &str, default: T) -> Result<T, Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| Error::Invalid(format!("failed to parse {key}='{val}': {e}"))),
        Err(_) => Ok(default),
    }
}
