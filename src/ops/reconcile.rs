use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock;
use crate::config::Config;
use crate::embedding::cache::{self, CacheOutcome};
use crate::embedding::provider::EmbeddingProvider;
use crate::error::Result;
use crate::graph::{self, MemoryGraph};
use crate::index::{self, IndexEntry, MemoryIndex};
use crate::lease::ScopeLease;
use crate::memory::{Memory, MemoryType};
use crate::scope::{ScopeKind, ScopePaths, ScopeResolver};
use crate::store;

/// Embedding counters inside a reconcile report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EmbeddingReport {
    pub created: usize,
    pub reused: usize,
    pub skipped: usize,
}

/// Completion report shared by the reconciliation procedures.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub scope: ScopeKind,
    /// Files (or entries) examined.
    pub scanned: usize,
    /// Legacy index entries migrated, or derived fields rewritten by refresh.
    pub migrated: usize,
    /// Stale entries, ghost nodes, and dangling edges removed.
    pub removed: usize,
    /// Entries or nodes restored from authoritative state.
    pub reattached: usize,
    pub embeddings: EmbeddingReport,
}

impl ReconcileReport {
    fn new(scope: ScopeKind) -> Self {
        Self {
            scope,
            scanned: 0,
            migrated: 0,
            removed: 0,
            reattached: 0,
            embeddings: EmbeddingReport::default(),
        }
    }
}

/// Scan `permanent/` and `temporary/` for parseable memory files.
/// Per-item failures are logged and skipped, never fatal.
async fn scan_files(paths: &ScopePaths) -> Result<Vec<(String, Memory)>> {
    let mut found = Vec::new();
    for subdir in ["permanent", "temporary"] {
        let dir = paths.root.join(subdir);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(dirent) = entries.next_entry().await? {
            let name = dirent.file_name().to_string_lossy().to_string();
            if !name.ends_with(".md") || name.starts_with('.') {
                continue;
            }
            let relative = format!("{subdir}/{name}");
            match store::read_memory(paths, &relative).await {
                Ok(memory) => found.push((relative, memory)),
                Err(e) => {
                    warn!(path = %relative, error = %e, "skipping unparseable file");
                }
            }
        }
    }
    Ok(found)
}

/// Build an index from scanned files. Frontmatter is authoritative; the
/// entry records where the file actually is. Duplicate IDs keep the most
/// recently updated file.
fn index_from_files(paths: &ScopePaths, files: &[(String, Memory)]) -> MemoryIndex {
    let mut idx = MemoryIndex::empty();
    for (relative, memory) in files {
        let entry = IndexEntry {
            id: memory.front.id.clone(),
            relative_path: relative.clone(),
            memory_type: memory.front.memory_type,
            tags: memory.front.tags.clone(),
            created: memory.front.created,
            updated: memory.front.updated,
            scope: paths.kind,
        };
        match idx.find(&entry.id) {
            Some(existing) if existing.updated >= entry.updated => {
                warn!(id = %entry.id, path = %relative, "duplicate id on disk, keeping newer");
            }
            _ => idx = index::upsert(&idx, entry),
        }
    }
    idx
}

/// Align graph nodes with the index: add missing nodes, fix types, drop
/// ghosts (cascading their edges). Edges are never fabricated.
fn align_graph(idx: &MemoryIndex, g: &MemoryGraph) -> (MemoryGraph, usize, usize) {
    let mut next = g.clone();
    let mut reattached = 0;
    let mut removed = 0;

    let ghost_ids: Vec<String> = next
        .nodes
        .iter()
        .filter(|n| !idx.contains(&n.id))
        .map(|n| n.id.clone())
        .collect();
    for ghost in &ghost_ids {
        let (g2, edges) = graph::remove_node(&next, ghost);
        next = g2;
        removed += 1 + edges;
    }

    for entry in &idx.memories {
        match next.node(&entry.id) {
            None => {
                next = graph::add_node(&next, &entry.id, entry.memory_type);
                reattached += 1;
            }
            Some(node) if node.memory_type != entry.memory_type => {
                next = graph::add_node(&next, &entry.id, entry.memory_type);
                reattached += 1;
            }
            Some(_) => {}
        }
    }

    (next, reattached, removed)
}

/// Drop edges whose endpoints are not both index entries.
fn drop_dangling_edges(idx: &MemoryIndex, g: &MemoryGraph) -> (MemoryGraph, usize) {
    let mut next = g.clone();
    let before = next.edges.len();
    next.edges
        .retain(|e| idx.contains(&e.source) && idx.contains(&e.target));
    let removed = before - next.edges.len();
    (next, removed)
}

/// Regenerate the index from the files on disk.
pub async fn rebuild(
    resolver: &ScopeResolver,
    config: &Config,
    scope: ScopeKind,
) -> Result<ReconcileReport> {
    let paths = resolver.require(scope)?;
    let _lease = ScopeLease::acquire(&paths, config.lease_timeout_ms).await?;
    resolver.ensure_layout(&paths).await?;
    let mut report = ReconcileReport::new(scope);

    let (old_index, migrated) = index::load_with_migrations(&paths).await?;
    report.migrated = migrated;

    let files = scan_files(&paths).await?;
    report.scanned = files.len();
    let new_index = index_from_files(&paths, &files);

    let old_ids = old_index.ids();
    let new_ids = new_index.ids();
    report.removed = old_ids.difference(&new_ids).count();
    report.reattached = new_ids.difference(&old_ids).count();

    index::save(&paths, &new_index).await?;
    info!(scope = %scope, scanned = report.scanned, "index rebuilt from files");
    Ok(report)
}

/// Regenerate graph nodes from the index: add missing nodes, remove ghosts.
pub async fn reindex(
    resolver: &ScopeResolver,
    config: &Config,
    scope: ScopeKind,
) -> Result<ReconcileReport> {
    let paths = resolver.require(scope)?;
    let _lease = ScopeLease::acquire(&paths, config.lease_timeout_ms).await?;
    resolver.ensure_layout(&paths).await?;
    let mut report = ReconcileReport::new(scope);

    let idx = index::load(&paths).await?;
    let g = graph::load(&paths).await?;
    report.scanned = idx.len();

    let (aligned, reattached, removed) = align_graph(&idx, &g);
    report.reattached = reattached;
    report.removed = removed;

    graph::save(&paths, &aligned, idx.len()).await?;
    info!(scope = %scope, reattached, removed, "graph reindexed");
    Ok(report)
}

/// Full reconciliation: rebuild the index from files, realign the graph,
/// drop dangling edges, and clean stale embedding entries. Idempotent and
/// safe to run at any time.
pub async fn sync(
    resolver: &ScopeResolver,
    config: &Config,
    scope: ScopeKind,
) -> Result<ReconcileReport> {
    let paths = resolver.require(scope)?;
    let _lease = ScopeLease::acquire(&paths, config.lease_timeout_ms).await?;
    resolver.ensure_layout(&paths).await?;
    let mut report = ReconcileReport::new(scope);

    let (old_index, migrated) = index::load_with_migrations(&paths).await?;
    report.migrated = migrated;

    let files = scan_files(&paths).await?;
    report.scanned = files.len();
    let new_index = index_from_files(&paths, &files);

    let old_ids = old_index.ids();
    let new_ids = new_index.ids();
    report.removed += old_ids.difference(&new_ids).count();
    report.reattached += new_ids.difference(&old_ids).count();

    let g = graph::load(&paths).await?;
    let (aligned, reattached, ghosts) = align_graph(&new_index, &g);
    report.reattached += reattached;
    report.removed += ghosts;
    let (aligned, dangling) = drop_dangling_edges(&new_index, &aligned);
    report.removed += dangling;

    index::save(&paths, &new_index).await?;
    graph::save(&paths, &aligned, new_index.len()).await?;

    // The cache is derived; entries for missing ids or breadcrumbs go
    // silently.
    let mut embeddings = cache::load(&paths).await?;
    let stale: Vec<String> = embeddings
        .memories
        .keys()
        .filter(|id| {
            new_index
                .find(id)
                .map_or(true, |e| e.memory_type == MemoryType::Breadcrumb)
        })
        .cloned()
        .collect();
    if !stale.is_empty() {
        for id in &stale {
            embeddings.memories.remove(id);
        }
        report.removed += stale.len();
        cache::save(&paths, &embeddings).await?;
    }

    info!(
        scope = %scope,
        scanned = report.scanned,
        removed = report.removed,
        reattached = report.reattached,
        "sync complete"
    );
    Ok(report)
}

/// Re-derive computed frontmatter fields (the embedding content-hash hint)
/// from body content, and optionally regenerate vectors for every
/// non-breadcrumb memory.
pub async fn refresh(
    resolver: &ScopeResolver,
    config: &Config,
    provider: Option<&dyn EmbeddingProvider>,
    scope: ScopeKind,
    regenerate_embeddings: bool,
) -> Result<ReconcileReport> {
    let paths = resolver.require(scope)?;
    let _lease = ScopeLease::acquire(&paths, config.lease_timeout_ms).await?;
    resolver.ensure_layout(&paths).await?;
    let mut report = ReconcileReport::new(scope);

    let idx = index::load(&paths).await?;
    let mut embeddings = cache::load(&paths).await?;
    let mut cache_dirty = false;

    if regenerate_embeddings && provider.is_none() {
        warn!(scope = %scope, "no embedding provider configured; vectors skipped");
    }

    for entry in &idx.memories {
        let mut memory = match store::read_memory(&paths, &entry.relative_path).await {
            Ok(memory) => memory,
            Err(e) => {
                warn!(id = %entry.id, error = %e, "skipping unreadable memory");
                continue;
            }
        };
        report.scanned += 1;

        if entry.memory_type == MemoryType::Breadcrumb {
            continue;
        }

        let (input, truncated) = cache::embedding_input(&memory.front.title, &memory.body);
        if truncated {
            warn!(id = %entry.id, "embedding input truncated at word boundary");
        }

        let hint = cache::content_hash(&input);
        if memory.front.embedding.as_deref() != Some(hint.as_str()) {
            memory.front.embedding = Some(hint);
            store::write_memory(&paths, &memory).await?;
            report.migrated += 1;
            debug!(id = %entry.id, "re-derived embedding hint");
        }

        if regenerate_embeddings {
            if let Some(provider) = provider {
                match cache::get_or_compute(&mut embeddings, &entry.id, &input, provider).await {
                    CacheOutcome::Created(_) => {
                        report.embeddings.created += 1;
                        cache_dirty = true;
                    }
                    CacheOutcome::Reused(_) => report.embeddings.reused += 1,
                    CacheOutcome::Skipped => report.embeddings.skipped += 1,
                }
            } else {
                report.embeddings.skipped += 1;
            }
        }
    }

    if cache_dirty {
        cache::save(&paths, &embeddings).await?;
    }

    info!(
        scope = %scope,
        scanned = report.scanned,
        rederived = report.migrated,
        created = report.embeddings.created,
        "refresh complete"
    );
    Ok(report)
}

/// Result of a prune pass over a scope's breadcrumbs.
#[derive(Debug, Clone, Serialize)]
pub struct PruneReport {
    pub scope: ScopeKind,
    pub pruned: Vec<String>,
    /// Breadcrumbs past the age threshold but referenced by a permanent
    /// memory; age alone never overrides an explicit link.
    pub skipped: Vec<String>,
}

/// Remove breadcrumbs whose `updated` is older than the threshold.
pub async fn prune(
    resolver: &ScopeResolver,
    config: &Config,
    scope: ScopeKind,
    max_age_days: Option<i64>,
) -> Result<PruneReport> {
    let paths = resolver.require(scope)?;
    let _lease = ScopeLease::acquire(&paths, config.lease_timeout_ms).await?;
    resolver.ensure_layout(&paths).await?;
    let mut state = super::load_state(&paths).await?;

    let max_age = chrono::Duration::days(max_age_days.unwrap_or(config.prune_max_age_days));
    let cutoff = clock::now() - max_age;

    let expired: Vec<IndexEntry> = state
        .index
        .memories
        .iter()
        .filter(|e| e.memory_type == MemoryType::Breadcrumb && e.updated < cutoff)
        .cloned()
        .collect();

    let permanent_sources: HashSet<String> = state
        .graph
        .nodes
        .iter()
        .filter(|n| n.memory_type != MemoryType::Breadcrumb)
        .map(|n| n.id.clone())
        .collect();

    let mut report = PruneReport {
        scope,
        pruned: Vec::new(),
        skipped: Vec::new(),
    };

    for entry in expired {
        let referenced = state
            .graph
            .edges
            .iter()
            .any(|e| e.target == entry.id && permanent_sources.contains(&e.source));
        if referenced {
            report.skipped.push(entry.id.clone());
            continue;
        }
        store::delete_memory(&paths, &entry.relative_path).await?;
        state.index = index::remove(&state.index, &entry.id);
        let (next, _) = graph::remove_node(&state.graph, &entry.id);
        state.graph = next;
        report.pruned.push(entry.id.clone());
    }

    if !report.pruned.is_empty() {
        super::save_state(&paths, &state).await?;
        let refs: Vec<&str> = report.pruned.iter().map(String::as_str).collect();
        super::mutate::invalidate_embedding(&paths, &refs).await;
    }

    info!(
        scope = %scope,
        pruned = report.pruned.len(),
        skipped = report.skipped.len(),
        "prune complete"
    );
    Ok(report)
}

/// One invariant violation found by [`validate`].
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub message: String,
}

/// Read-only invariant checks over files, index, graph, and cache.
pub async fn validate(resolver: &ScopeResolver, scope: ScopeKind) -> Result<Vec<Violation>> {
    let Some(paths) = resolver.resolve(scope) else {
        return Ok(Vec::new());
    };
    let mut violations = Vec::new();

    let idx = index::load(&paths).await?;
    let g = graph::load(&paths).await?;
    let embeddings = cache::load(&paths).await?;
    let files = scan_files(&paths).await?;

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for entry in &idx.memories {
        if !seen_ids.insert(&entry.id) {
            violations.push(Violation {
                kind: "duplicate_id",
                id: Some(entry.id.clone()),
                message: format!("id '{}' appears more than once in the index", entry.id),
            });
        }
        if !paths.memory_path(&entry.relative_path).exists() {
            violations.push(Violation {
                kind: "missing_file",
                id: Some(entry.id.clone()),
                message: format!("index entry points at missing file {}", entry.relative_path),
            });
        }
        let prefix = entry.memory_type.prefix();
        if entry.id != prefix && !entry.id.starts_with(&format!("{prefix}-")) {
            violations.push(Violation {
                kind: "prefix_mismatch",
                id: Some(entry.id.clone()),
                message: format!("id does not carry the '{prefix}' type prefix"),
            });
        }
        let expected_dir = entry.memory_type.subdirectory();
        if !entry.relative_path.starts_with(&format!("{expected_dir}/")) {
            violations.push(Violation {
                kind: "directory_mismatch",
                id: Some(entry.id.clone()),
                message: format!(
                    "{} memories belong under {expected_dir}/, found {}",
                    entry.memory_type, entry.relative_path
                ),
            });
        }
    }

    for (relative, memory) in &files {
        match idx.find(&memory.front.id) {
            None => violations.push(Violation {
                kind: "unindexed_file",
                id: Some(memory.front.id.clone()),
                message: format!("file {relative} has no index entry"),
            }),
            Some(entry) => {
                if entry.memory_type != memory.front.memory_type {
                    violations.push(Violation {
                        kind: "type_mismatch",
                        id: Some(memory.front.id.clone()),
                        message: format!(
                            "index says {}, frontmatter says {}",
                            entry.memory_type, memory.front.memory_type
                        ),
                    });
                }
            }
        }
        let stem = relative
            .rsplit('/')
            .next()
            .and_then(|n| n.strip_suffix(".md"))
            .unwrap_or_default();
        if stem != memory.front.id {
            violations.push(Violation {
                kind: "filename_mismatch",
                id: Some(memory.front.id.clone()),
                message: format!("frontmatter id does not match filename stem '{stem}'"),
            });
        }
    }

    for node in &g.nodes {
        if !idx.contains(&node.id) {
            violations.push(Violation {
                kind: "ghost_node",
                id: Some(node.id.clone()),
                message: "graph node has no index entry".into(),
            });
        }
    }
    for edge in &g.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !g.has_node(endpoint) {
                violations.push(Violation {
                    kind: "dangling_edge",
                    id: Some(endpoint.clone()),
                    message: format!("edge {} -> {} references a missing node", edge.source, edge.target),
                });
            }
        }
    }

    for id in embeddings.memories.keys() {
        match idx.find(id) {
            None => violations.push(Violation {
                kind: "stale_embedding",
                id: Some(id.clone()),
                message: "embedding entry has no index entry".into(),
            }),
            Some(entry) if entry.memory_type == MemoryType::Breadcrumb => {
                violations.push(Violation {
                    kind: "breadcrumb_embedding",
                    id: Some(id.clone()),
                    message: "breadcrumbs are excluded from the embedding cache".into(),
                })
            }
            Some(_) => {}
        }
    }

    Ok(violations)
}

/// Combined repair report: a sync pass plus the violations that remain.
#[derive(Debug, Clone, Serialize)]
pub struct RepairReport {
    pub sync: ReconcileReport,
    pub violations: Vec<Violation>,
}

/// Sync, then validate, and report both.
pub async fn repair(
    resolver: &ScopeResolver,
    config: &Config,
    scope: ScopeKind,
) -> Result<RepairReport> {
    let sync_report = sync(resolver, config, scope).await?;
    let violations = validate(resolver, scope).await?;
    Ok(RepairReport {
        sync: sync_report,
        violations,
    })
}
