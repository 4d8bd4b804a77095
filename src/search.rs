use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::embedding::cache::{self, embedding_input};
use crate::embedding::provider::EmbeddingProvider;
use crate::error::Result;
use crate::index;
use crate::memory::MemoryType;
use crate::scope::{ScopeKind, ScopeResolver};
use crate::store;

/// Fixed stop-word list stripped from keyword queries and documents.
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "all", "am", "an", "and", "any", "are", "as", "at",
    "be", "because", "been", "before", "being", "between", "both", "but", "by", "can", "did",
    "do", "does", "doing", "down", "during", "each", "few", "for", "from", "further", "had",
    "has", "have", "having", "here", "how", "if", "in", "into", "is", "it", "its", "just",
    "more", "most", "no", "nor", "not", "now", "of", "off", "on", "once", "only", "or", "other",
    "our", "out", "over", "own", "same", "should", "so", "some", "such", "than", "that", "the",
    "their", "them", "then", "there", "these", "they", "this", "those", "through", "to", "too",
    "under", "until", "up", "very", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "why", "will", "with", "you", "your",
];

/// How a search was ultimately answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    Semantic,
    Keyword,
}

/// One search result across the merged scope set.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub scope: ScopeKind,
    pub id: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub title: String,
    pub tags: Vec<String>,
    pub score: f64,
    #[serde(with = "crate::clock::serde_millis")]
    pub updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// The full search response, carrying the method that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub method: SearchMethod,
    pub hits: Vec<SearchHit>,
}

/// Options for [`search`].
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub query: String,
    /// Scopes to search; empty means every available scope.
    pub scopes: Vec<ScopeKind>,
    pub limit: usize,
    /// `Some(true)` prefers semantic, `Some(false)` forces keyword,
    /// `None` picks semantic when a provider is usable.
    pub semantic: Option<bool>,
    pub threshold: f64,
}

/// Unified query across scopes: semantic when the cache and provider allow
/// it, keyword otherwise. Results are de-duplicated by (scope, id) and
/// ordered by score then recency.
pub async fn search(
    resolver: &ScopeResolver,
    provider: Option<&dyn EmbeddingProvider>,
    opts: &SearchOptions,
) -> Result<SearchResponse> {
    let scopes = effective_scopes(&opts.scopes);

    let want_semantic = opts.semantic.unwrap_or(true);
    if want_semantic {
        if let Some(provider) = provider {
            if provider.probe().await {
                match semantic(resolver, provider, &opts.query, &scopes, opts.threshold).await {
                    Ok(mut hits) => {
                        finish(&mut hits, opts.limit);
                        if !hits.is_empty() || opts.semantic == Some(true) {
                            info!(hits = hits.len(), "semantic search complete");
                            return Ok(SearchResponse {
                                method: SearchMethod::Semantic,
                                hits,
                            });
                        }
                        // No vectors cached anywhere; keyword gives a useful
                        // answer instead of an empty one.
                        debug!("semantic search found no candidates, trying keyword");
                    }
                    Err(e) => {
                        warn!(error = %e, "semantic search failed, falling back to keyword");
                    }
                }
            } else {
                debug!(provider = provider.name(), "provider unreachable, using keyword search");
            }
        }
    }

    let mut hits = keyword(resolver, &opts.query, &scopes).await?;
    finish(&mut hits, opts.limit);
    info!(hits = hits.len(), "keyword search complete");
    Ok(SearchResponse {
        method: SearchMethod::Keyword,
        hits,
    })
}

fn effective_scopes(requested: &[ScopeKind]) -> Vec<ScopeKind> {
    if requested.is_empty() {
        ScopeKind::ALL.to_vec()
    } else {
        requested.to_vec()
    }
}

/// De-duplicate by (scope, id), order by score then recency, truncate.
fn finish(hits: &mut Vec<SearchHit>, limit: usize) {
    let mut seen = std::collections::HashSet::new();
    hits.retain(|h| seen.insert((h.scope, h.id.clone())));
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.updated.cmp(&a.updated))
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(limit);
}

/// Keyword search: tokenised, stop-worded frequency scoring over
/// title + tags + body.
pub async fn keyword(
    resolver: &ScopeResolver,
    query: &str,
    scopes: &[ScopeKind],
) -> Result<Vec<SearchHit>> {
    let terms = tokenize(query);
    if terms.is_empty() {
        return Ok(Vec::new());
    }

    let mut hits = Vec::new();
    for &kind in scopes {
        let Some(paths) = resolver.resolve(kind) else {
            continue;
        };
        let idx = index::load(&paths).await?;
        for entry in &idx.memories {
            let memory = match store::read_memory(&paths, &entry.relative_path).await {
                Ok(memory) => memory,
                Err(e) => {
                    warn!(scope = %kind, id = %entry.id, error = %e, "skipping unreadable memory");
                    continue;
                }
            };

            let score = keyword_score(&terms, &memory.front.title, &memory.front.tags, &memory.body);
            if score <= 0.0 {
                continue;
            }
            hits.push(SearchHit {
                scope: kind,
                id: entry.id.clone(),
                memory_type: entry.memory_type,
                title: memory.front.title.clone(),
                tags: memory.front.tags.clone(),
                score,
                updated: entry.updated,
                snippet: snippet(&memory.body, &terms),
            });
        }
    }
    Ok(hits)
}

/// Semantic search: cosine similarity over cached vectors, thresholded.
/// Breadcrumbs are excluded from the candidate set.
pub async fn semantic(
    resolver: &ScopeResolver,
    provider: &dyn EmbeddingProvider,
    query: &str,
    scopes: &[ScopeKind],
    threshold: f64,
) -> Result<Vec<SearchHit>> {
    let (input, _) = embedding_input(query, "");
    let inputs = [input];
    let vectors = provider.embed_batch(&inputs).await?;
    let query_vector = vectors.into_iter().next().unwrap_or_default();
    if query_vector.is_empty() {
        return Ok(Vec::new());
    }

    let mut hits = Vec::new();
    for &kind in scopes {
        let Some(paths) = resolver.resolve(kind) else {
            continue;
        };
        let idx = index::load(&paths).await?;
        let embeddings = cache::load(&paths).await?;

        for entry in &idx.memories {
            if entry.memory_type == MemoryType::Breadcrumb {
                continue;
            }
            let Some(cached) = embeddings.memories.get(&entry.id) else {
                continue;
            };
            let score = cache::cosine(&query_vector, &cached.vector);
            if score < threshold {
                continue;
            }

            // Title comes from the file; an unreadable file falls back to
            // the id so a stale cache entry cannot sink the whole query.
            let (title, tags) = match store::read_memory(&paths, &entry.relative_path).await {
                Ok(memory) => (memory.front.title, memory.front.tags),
                Err(_) => (entry.id.clone(), entry.tags.clone()),
            };

            hits.push(SearchHit {
                scope: kind,
                id: entry.id.clone(),
                memory_type: entry.memory_type,
                title,
                tags,
                score,
                updated: entry.updated,
                snippet: None,
            });
        }
    }
    Ok(hits)
}

/// Lowercase alphanumeric tokens (underscores kept), stop words removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .map(str::to_lowercase)
        .filter(|t| t.len() > 1 && !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// Frequency score with field weighting: title 3x, tags 2x, body 1x.
fn keyword_score(terms: &[String], title: &str, tags: &[String], body: &str) -> f64 {
    let title_tokens = tokenize(title);
    let tag_tokens: Vec<String> = tags.iter().flat_map(|t| tokenize(t)).collect();
    let body_tokens = tokenize(body);

    let mut score = 0.0;
    for term in terms {
        let title_count = title_tokens.iter().filter(|t| *t == term).count() as f64;
        let tag_count = tag_tokens.iter().filter(|t| *t == term).count() as f64;
        let body_count = body_tokens.iter().filter(|t| *t == term).count() as f64;
        score += title_count * 3.0 + tag_count * 2.0 + body_count;
    }
    score
}

/// First body line containing a query term, trimmed for display.
fn snippet(body: &str, terms: &[String]) -> Option<String> {
    for line in body.lines() {
        let lowered = line.to_lowercase();
        if terms.iter().any(|t| lowered.contains(t.as_str())) {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let excerpt: String = trimmed.chars().take(160).collect();
            return Some(excerpt);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;

    #[test]
    fn tokenize_strips_stop_words_and_short_tokens() {
        let tokens = tokenize("The quick fix for a lease timeout in the store");
        assert_eq!(tokens, vec!["quick", "fix", "lease", "timeout", "store"]);
    }

    #[test]
    fn tokenize_keeps_underscores() {
        assert_eq!(tokenize("use_fts_index"), vec!["use_fts_index"]);
    }

    #[test]
    fn keyword_score_weights_title_over_body() {
        let terms = vec!["lease".to_string()];
        let in_title = keyword_score(&terms, "Lease design", &[], "body text");
        let in_body = keyword_score(&terms, "Design", &[], "the lease text");
        assert!(in_title > in_body);
        assert_eq!(in_title, 3.0);
        assert_eq!(in_body, 1.0);
    }

    #[test]
    fn keyword_score_counts_frequency() {
        let terms = vec!["retry".to_string()];
        let score = keyword_score(&terms, "Retry", &["retry".into()], "retry retry");
        assert_eq!(score, 3.0 + 2.0 + 2.0);
    }

    #[test]
    fn keyword_score_zero_when_absent() {
        let terms = vec!["kubernetes".to_string()];
        assert_eq!(keyword_score(&terms, "Lease design", &[], "body"), 0.0);
    }

    #[test]
    fn snippet_finds_first_matching_line() {
        let body = "# Heading\n\nNothing here.\nThe lease guards writers.\n";
        let terms = vec!["lease".to_string()];
        assert_eq!(
            snippet(body, &terms),
            Some("The lease guards writers.".to_string())
        );
    }

    #[test]
    fn snippet_none_when_no_match() {
        assert_eq!(snippet("body", &["absent".to_string()]), None);
    }

    fn hit(scope: ScopeKind, id: &str, score: f64, updated: &str) -> SearchHit {
        SearchHit {
            scope,
            id: id.into(),
            memory_type: MemoryType::Learning,
            title: id.into(),
            tags: Vec::new(),
            score,
            updated: clock::parse_timestamp(updated).unwrap(),
            snippet: None,
        }
    }

    #[test]
    fn finish_orders_by_score_then_recency() {
        let mut hits = vec![
            hit(ScopeKind::Project, "learning-old", 1.0, "2026-01-01T00:00:00.000Z"),
            hit(ScopeKind::Project, "learning-strong", 5.0, "2026-01-01T00:00:00.000Z"),
            hit(ScopeKind::Project, "learning-new", 1.0, "2026-02-01T00:00:00.000Z"),
        ];
        finish(&mut hits, 10);
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["learning-strong", "learning-new", "learning-old"]);
    }

    #[test]
    fn finish_dedupes_by_scope_and_id() {
        let mut hits = vec![
            hit(ScopeKind::Project, "learning-a", 2.0, "2026-01-01T00:00:00.000Z"),
            hit(ScopeKind::Project, "learning-a", 1.0, "2026-01-01T00:00:00.000Z"),
            hit(ScopeKind::Global, "learning-a", 1.0, "2026-01-01T00:00:00.000Z"),
        ];
        finish(&mut hits, 10);
        assert_eq!(hits.len(), 2, "same id in different scopes is kept");
    }

    #[test]
    fn finish_truncates_to_limit() {
        let mut hits = (0..20)
            .map(|i| {
                hit(
                    ScopeKind::Project,
                    &format!("learning-{i}"),
                    i as f64,
                    "2026-01-01T00:00:00.000Z",
                )
            })
            .collect::<Vec<_>>();
        finish(&mut hits, 5);
        assert_eq!(hits.len(), 5);
        assert_eq!(hits[0].id, "learning-19");
    }
}
