use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock;
use crate::config::Config;
use crate::embedding::cache::{self, CacheOutcome};
use crate::embedding::provider::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::frontmatter::Frontmatter;
use crate::graph;
use crate::index::{self, IndexEntry};
use crate::lease::ScopeLease;
use crate::memory::{generate_id, generate_thought_id, Memory, MemoryType, Severity};
use crate::scope::{ScopeKind, ScopeResolver};
use crate::store;

use super::load_state;

/// A request to create a new memory.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub scope: ScopeKind,
    pub memory_type: MemoryType,
    /// Optional only for breadcrumbs, which fall back to a timestamp ID.
    pub title: Option<String>,
    pub body: String,
    pub tags: Vec<String>,
    pub links: Vec<String>,
    pub severity: Option<Severity>,
    pub project: Option<String>,
}

/// Result of a successful write.
#[derive(Debug, Clone, Serialize)]
pub struct WriteResult {
    pub id: String,
    pub scope: ScopeKind,
    #[serde(rename = "relativePath")]
    pub relative_path: String,
    /// Requested links whose targets were not present in-scope.
    #[serde(rename = "skippedLinks")]
    pub skipped_links: Vec<String>,
    pub embedded: bool,
}

/// Create a memory: generate a unique ID, persist the file, upsert the
/// index entry, add the graph node and any valid in-scope edges, and
/// opportunistically embed.
pub async fn write(
    resolver: &ScopeResolver,
    config: &Config,
    provider: Option<&dyn EmbeddingProvider>,
    request: WriteRequest,
) -> Result<WriteResult> {
    let paths = resolver.require(request.scope)?;
    let _lease = ScopeLease::acquire(&paths, config.lease_timeout_ms).await?;
    resolver.ensure_layout(&paths).await?;

    let mut state = load_state(&paths).await?;
    let now = clock::now();
    let existing = state.index.ids();

    let title = request
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let (id, title) = match (title, request.memory_type) {
        (Some(title), memory_type) => (
            generate_id(memory_type, title, &existing),
            title.to_string(),
        ),
        (None, MemoryType::Breadcrumb) => {
            let id = generate_thought_id(now, &existing);
            let title = format!("Thought {}", now.format("%Y-%m-%d %H:%M"));
            (id, title)
        }
        (None, memory_type) => {
            return Err(Error::Invalid(format!(
                "a title is required for {memory_type} memories"
            )))
        }
    };

    let tags = normalize_tags(&request.tags)?;

    // Only links whose targets exist in-scope become frontmatter links and
    // graph edges; the rest are reported as skipped, not errors.
    let mut links = Vec::new();
    let mut skipped_links = Vec::new();
    for link in &request.links {
        if link != &id && state.index.contains(link) {
            if !links.contains(link) {
                links.push(link.clone());
            }
        } else {
            skipped_links.push(link.clone());
        }
    }

    let memory = Memory {
        front: Frontmatter {
            id: id.clone(),
            title,
            memory_type: request.memory_type,
            scope: request.scope,
            tags: tags.clone(),
            created: now,
            updated: now,
            severity: request.severity,
            project: request.project.clone(),
            links: links.clone(),
            embedding: None,
        },
        body: request.body.clone(),
    };
    let relative_path = memory.relative_path();

    store::write_memory(&paths, &memory).await?;

    state.index = index::upsert(
        &state.index,
        IndexEntry {
            id: id.clone(),
            relative_path: relative_path.clone(),
            memory_type: request.memory_type,
            tags,
            created: now,
            updated: now,
            scope: request.scope,
        },
    );
    state.graph = graph::add_node(&state.graph, &id, request.memory_type);
    for link in &links {
        let (next, _) = graph::add_edge(&state.graph, &id, link, None);
        state.graph = next;
    }

    // File is on disk; if the derived indices cannot be persisted, roll the
    // file back so the scope stays consistent without a sync.
    if let Err(e) = super::save_state(&paths, &state).await {
        warn!(id = %id, error = %e, "index persistence failed, rolling back file");
        if let Err(rollback) = store::delete_memory(&paths, &relative_path).await {
            warn!(id = %id, error = %rollback, "rollback failed, run sync to reconcile");
        }
        return Err(e);
    }

    // Embedding is an optimisation: failures are logged and never fail the
    // write. Breadcrumbs are excluded from the cache.
    let mut embedded = false;
    if request.memory_type != MemoryType::Breadcrumb {
        if let Some(provider) = provider {
            let (input, truncated) = cache::embedding_input(&memory.front.title, &memory.body);
            if truncated {
                warn!(id = %id, "embedding input truncated at word boundary");
            }
            match cache::load(&paths).await {
                Ok(mut embeddings) => {
                    if let CacheOutcome::Created(_) =
                        cache::get_or_compute(&mut embeddings, &id, &input, provider).await
                    {
                        embedded = true;
                        if let Err(e) = cache::save(&paths, &embeddings).await {
                            warn!(id = %id, error = %e, "embedding cache save failed");
                            embedded = false;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "embedding cache unreadable, skipping embed"),
            }
        }
    }

    info!(
        scope = %request.scope,
        id = %id,
        links = links.len(),
        skipped = skipped_links.len(),
        "memory written"
    );

    Ok(WriteResult {
        id,
        scope: request.scope,
        relative_path,
        skipped_links,
        embedded,
    })
}

/// A memory read back out of the store.
#[derive(Debug, Clone, Serialize)]
pub struct ReadResult {
    #[serde(flatten)]
    pub front: Frontmatter,
    pub body: String,
    #[serde(rename = "relativePath")]
    pub relative_path: String,
}

/// Read a memory by ID. With a scope the lookup is direct; without one the
/// scopes are scanned in precedence order and the first hit wins.
pub async fn read(
    resolver: &ScopeResolver,
    id: &str,
    scope: Option<ScopeKind>,
) -> Result<ReadResult> {
    let scopes: Vec<ScopeKind> = match scope {
        Some(kind) => vec![kind],
        None => ScopeKind::ALL.to_vec(),
    };

    for kind in scopes {
        let Some(paths) = resolver.resolve(kind) else {
            continue;
        };
        let idx = index::load(&paths).await?;
        if let Some(entry) = idx.find(id) {
            let memory = store::read_memory(&paths, &entry.relative_path).await?;
            debug!(scope = %kind, id = %id, "memory read");
            return Ok(ReadResult {
                front: memory.front,
                body: memory.body,
                relative_path: entry.relative_path.clone(),
            });
        }
    }

    match scope {
        Some(kind) => Err(Error::not_found(id, kind)),
        None => Err(Error::not_found_anywhere(id)),
    }
}

/// Trim, drop empties, and reject tags that could not survive frontmatter.
pub(crate) fn normalize_tags(tags: &[String]) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() {
            continue;
        }
        if tag.contains(['\n', ',']) {
            return Err(Error::Invalid(format!("invalid tag '{tag}'")));
        }
        if !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_tags_trims_and_dedupes() {
        let tags = vec![
            " perf ".to_string(),
            "hooks".to_string(),
            "perf".to_string(),
            "".to_string(),
        ];
        assert_eq!(normalize_tags(&tags).unwrap(), vec!["perf", "hooks"]);
    }

    #[test]
    fn normalize_tags_rejects_newlines() {
        assert!(normalize_tags(&["bad\ntag".to_string()]).is_err());
    }
}
