use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::clock;
use crate::error::Result;
use crate::scope::ScopePaths;
use crate::store;

use super::provider::EmbeddingProvider;

/// Current embeddings document version.
pub const EMBEDDINGS_VERSION: u32 = 1;

/// Provider-safe input length in characters; longer content is truncated at
/// a word boundary before being sent.
pub const MAX_EMBED_CHARS: usize = 6000;

/// A cached vector keyed by memory ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingEntry {
    pub vector: Vec<f32>,
    pub content_hash: String,
    #[serde(with = "crate::clock::serde_millis")]
    pub timestamp: DateTime<Utc>,
}

/// The per-scope `embeddings.json` document. Fully derived and safe to
/// discard; hash mismatches invalidate entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingCache {
    pub version: u32,
    pub memories: HashMap<String, EmbeddingEntry>,
}

impl EmbeddingCache {
    pub fn empty() -> Self {
        Self {
            version: EMBEDDINGS_VERSION,
            memories: HashMap::new(),
        }
    }

    /// A cached vector, only when its hash still matches `content`.
    pub fn fresh(&self, id: &str, content: &str) -> Option<&EmbeddingEntry> {
        let entry = self.memories.get(id)?;
        (entry.content_hash == content_hash(content)).then_some(entry)
    }
}

/// Outcome of a cache lookup-or-compute.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheOutcome {
    /// Vector computed by the provider and stored.
    Created(Vec<f32>),
    /// Cached vector still valid for the content hash.
    Reused(Vec<f32>),
    /// Provider failed or returned an empty vector; entry untouched.
    Skipped,
}

/// SHA-256 hex digest of embedding input, used to detect stale entries.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compose the embedding input for a memory and truncate it to a
/// provider-safe length at a word boundary. Returns the input and whether
/// truncation occurred.
pub fn embedding_input(title: &str, body: &str) -> (String, bool) {
    let combined = if body.is_empty() {
        title.to_string()
    } else {
        format!("{title}\n\n{body}")
    };

    if combined.chars().count() <= MAX_EMBED_CHARS {
        return (combined, false);
    }

    let cut: String = combined.chars().take(MAX_EMBED_CHARS).collect();
    let truncated = match cut.rfind(char::is_whitespace) {
        Some(boundary) if boundary > 0 => cut[..boundary].trim_end().to_string(),
        _ => cut,
    };
    (truncated, true)
}

/// Return a vector for `(id, content)`, reusing the cache when the content
/// hash matches and asking the provider otherwise.
///
/// Provider failures and empty vectors degrade to [`CacheOutcome::Skipped`];
/// they never fail the caller and never store an entry.
pub async fn get_or_compute(
    cache: &mut EmbeddingCache,
    id: &str,
    content: &str,
    provider: &dyn EmbeddingProvider,
) -> CacheOutcome {
    let hash = content_hash(content);
    if let Some(entry) = cache.memories.get(id) {
        if entry.content_hash == hash {
            return CacheOutcome::Reused(entry.vector.clone());
        }
    }

    let input = [content.to_string()];
    let vectors = match provider.embed_batch(&input).await {
        Ok(vectors) => vectors,
        Err(e) => {
            warn!(id = %id, error = %e, "embedding failed, skipping entry");
            return CacheOutcome::Skipped;
        }
    };

    let Some(vector) = vectors.into_iter().next().filter(|v| !v.is_empty()) else {
        warn!(id = %id, "provider returned an empty vector, skipping entry");
        return CacheOutcome::Skipped;
    };

    cache.memories.insert(
        id.to_string(),
        EmbeddingEntry {
            vector: vector.clone(),
            content_hash: hash,
            timestamp: clock::now(),
        },
    );
    debug!(id = %id, "cached new embedding");
    CacheOutcome::Created(vector)
}

/// Cosine similarity between two vectors; 0.0 for mismatched or zero-length
/// inputs.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Load a scope's embedding cache; a missing file is an empty cache.
pub async fn load(paths: &ScopePaths) -> Result<EmbeddingCache> {
    let cache: Option<EmbeddingCache> = store::read_json(&paths.embeddings_path()).await?;
    Ok(cache.unwrap_or_else(EmbeddingCache::empty))
}

/// Persist a scope's embedding cache atomically.
pub async fn save(paths: &ScopePaths, cache: &EmbeddingCache) -> Result<()> {
    store::write_json(&paths.embeddings_path(), cache, paths.kind.is_private()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::mock::MockProvider;
    use crate::scope::ScopeKind;
    use tempfile::TempDir;

    #[test]
    fn content_hash_is_stable_hex() {
        let a = content_hash("scope isolation");
        let b = content_hash("scope isolation");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, content_hash("scope isolation!"));
    }

    #[test]
    fn short_input_is_untouched() {
        let (input, truncated) = embedding_input("Title", "Short body");
        assert_eq!(input, "Title\n\nShort body");
        assert!(!truncated);
    }

    #[test]
    fn title_only_input() {
        let (input, truncated) = embedding_input("Just a title", "");
        assert_eq!(input, "Just a title");
        assert!(!truncated);
    }

    #[test]
    fn long_input_truncates_at_word_boundary() {
        let body = "word ".repeat(2000);
        let (input, truncated) = embedding_input("Title", &body);
        assert!(truncated);
        assert!(input.chars().count() <= MAX_EMBED_CHARS);
        assert!(input.ends_with("word"), "must cut on a word boundary");
    }

    #[test]
    fn exactly_limit_is_not_truncated() {
        let title = "t".repeat(MAX_EMBED_CHARS);
        let (input, truncated) = embedding_input(&title, "");
        assert_eq!(input.chars().count(), MAX_EMBED_CHARS);
        assert!(!truncated);
    }

    #[tokio::test]
    async fn compute_then_reuse() {
        let provider = MockProvider::new(8);
        let mut cache = EmbeddingCache::empty();

        let first = get_or_compute(&mut cache, "learning-a", "content", &provider).await;
        assert!(matches!(first, CacheOutcome::Created(_)));
        assert_eq!(provider.call_count(), 1);

        let second = get_or_compute(&mut cache, "learning-a", "content", &provider).await;
        assert!(matches!(second, CacheOutcome::Reused(_)));
        assert_eq!(provider.call_count(), 1, "fresh entry must not re-embed");
    }

    #[tokio::test]
    async fn hash_mismatch_recomputes() {
        let provider = MockProvider::new(8);
        let mut cache = EmbeddingCache::empty();

        get_or_compute(&mut cache, "learning-a", "old content", &provider).await;
        let outcome = get_or_compute(&mut cache, "learning-a", "new content", &provider).await;
        assert!(matches!(outcome, CacheOutcome::Created(_)));
        assert_eq!(provider.call_count(), 2);
        assert_eq!(
            cache.memories["learning-a"].content_hash,
            content_hash("new content")
        );
    }

    #[tokio::test]
    async fn empty_vector_is_never_stored() {
        let provider = MockProvider::new(0);
        let mut cache = EmbeddingCache::empty();
        let outcome = get_or_compute(&mut cache, "learning-a", "content", &provider).await;
        assert_eq!(outcome, CacheOutcome::Skipped);
        assert!(cache.memories.is_empty());
    }

    #[test]
    fn fresh_checks_hash() {
        let mut cache = EmbeddingCache::empty();
        cache.memories.insert(
            "learning-a".into(),
            EmbeddingEntry {
                vector: vec![1.0, 0.0],
                content_hash: content_hash("current"),
                timestamp: clock::now(),
            },
        );
        assert!(cache.fresh("learning-a", "current").is_some());
        assert!(cache.fresh("learning-a", "stale").is_none());
        assert!(cache.fresh("learning-b", "current").is_none());
    }

    #[test]
    fn cosine_properties() {
        let a = vec![1.0f32, 0.0, 0.0];
        let b = vec![0.0f32, 1.0, 0.0];
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-9);
        assert!(cosine(&a, &b).abs() < 1e-9);
        assert_eq!(cosine(&a, &[]), 0.0);
        assert_eq!(cosine(&[], &[]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn load_save_round_trip() {
        let dir = TempDir::new().unwrap();
        let paths = ScopePaths {
            kind: ScopeKind::Project,
            root: dir.path().to_path_buf(),
        };

        let empty = load(&paths).await.unwrap();
        assert!(empty.memories.is_empty());

        let mut cache = EmbeddingCache::empty();
        cache.memories.insert(
            "hub-x".into(),
            EmbeddingEntry {
                vector: vec![0.5, 0.5],
                content_hash: content_hash("x"),
                timestamp: clock::parse_timestamp("2026-01-01T00:00:00.000Z").unwrap(),
            },
        );
        save(&paths, &cache).await.unwrap();
        let loaded = load(&paths).await.unwrap();
        assert_eq!(loaded, cache);

        let on_disk = std::fs::read_to_string(paths.embeddings_path()).unwrap();
        assert!(on_disk.contains("contentHash"));
    }
}
