use serde::Serialize;
use tracing::{info, warn};

use crate::clock;
use crate::config::Config;
use crate::embedding::cache;
use crate::error::{Error, Result};
use crate::graph;
use crate::index::{self, IndexEntry};
use crate::lease::ScopeLease;
use crate::memory::{generate_id, MemoryType};
use crate::scope::{ScopeKind, ScopePaths, ScopeResolver};
use crate::store;

use super::{load_state, save_state, ScopeState};

/// Result of a tag or untag mutation.
#[derive(Debug, Clone, Serialize)]
pub struct TagResult {
    pub id: String,
    pub tags: Vec<String>,
}

/// Result of a rename.
#[derive(Debug, Clone, Serialize)]
pub struct RenameResult {
    #[serde(rename = "oldId")]
    pub old_id: String,
    #[serde(rename = "newId")]
    pub new_id: String,
    #[serde(rename = "relativePath")]
    pub relative_path: String,
}

/// Result of a cross-scope move.
#[derive(Debug, Clone, Serialize)]
pub struct MoveResult {
    pub id: String,
    pub from: ScopeKind,
    pub to: ScopeKind,
    #[serde(rename = "sourceEdgesRemoved")]
    pub source_edges_removed: usize,
    #[serde(rename = "targetEdgesCreated")]
    pub target_edges_created: usize,
}

/// Result of a promotion or retype.
#[derive(Debug, Clone, Serialize)]
pub struct PromoteResult {
    #[serde(rename = "oldId")]
    pub old_id: String,
    #[serde(rename = "newId")]
    pub new_id: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    #[serde(rename = "relativePath")]
    pub relative_path: String,
}

/// Result of an archive.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveResult {
    pub id: String,
    #[serde(rename = "edgesRemoved")]
    pub edges_removed: usize,
    #[serde(rename = "relativePath")]
    pub relative_path: String,
}

/// Result of a delete.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResult {
    pub id: String,
    #[serde(rename = "edgesRemoved")]
    pub edges_removed: usize,
}

fn require_entry(state: &ScopeState, id: &str, scope: ScopeKind) -> Result<IndexEntry> {
    state
        .index
        .find(id)
        .cloned()
        .ok_or_else(|| Error::not_found(id, scope))
}

/// Add tags to a memory. Touches `updated` and keeps file, index, and graph
/// consistent under the lease.
pub async fn tag(
    resolver: &ScopeResolver,
    config: &Config,
    scope: ScopeKind,
    id: &str,
    tags: &[String],
) -> Result<TagResult> {
    mutate_tags(resolver, config, scope, id, tags, TagAction::Add).await
}

/// Remove tags from a memory.
pub async fn untag(
    resolver: &ScopeResolver,
    config: &Config,
    scope: ScopeKind,
    id: &str,
    tags: &[String],
) -> Result<TagResult> {
    mutate_tags(resolver, config, scope, id, tags, TagAction::Remove).await
}

enum TagAction {
    Add,
    Remove,
}

async fn mutate_tags(
    resolver: &ScopeResolver,
    config: &Config,
    scope: ScopeKind,
    id: &str,
    tags: &[String],
    action: TagAction,
) -> Result<TagResult> {
    let incoming = super::write::normalize_tags(tags)?;
    if incoming.is_empty() {
        return Err(Error::Invalid("no tags given".into()));
    }

    let paths = resolver.require(scope)?;
    let _lease = ScopeLease::acquire(&paths, config.lease_timeout_ms).await?;
    let mut state = load_state(&paths).await?;
    let entry = require_entry(&state, id, scope)?;

    let mut memory = store::read_memory(&paths, &entry.relative_path).await?;
    match action {
        TagAction::Add => {
            for tag in incoming {
                if !memory.front.tags.contains(&tag) {
                    memory.front.tags.push(tag);
                }
            }
        }
        TagAction::Remove => {
            memory.front.tags.retain(|t| !incoming.contains(t));
        }
    }
    let now = clock::now();
    memory.front.updated = now;
    store::write_memory(&paths, &memory).await?;

    let mut updated_entry = entry;
    updated_entry.tags = memory.front.tags.clone();
    updated_entry.updated = now;
    state.index = index::upsert(&state.index, updated_entry);
    index::save(&paths, &state.index).await?;

    Ok(TagResult {
        id: id.to_string(),
        tags: memory.front.tags,
    })
}

/// Rename a memory: recompute its ID from the new title, rename the file,
/// and rewrite every in-scope edge referencing the old ID.
pub async fn rename(
    resolver: &ScopeResolver,
    config: &Config,
    scope: ScopeKind,
    id: &str,
    new_title: &str,
) -> Result<RenameResult> {
    let new_title = new_title.trim();
    if new_title.is_empty() {
        return Err(Error::Invalid("new title is empty".into()));
    }

    let paths = resolver.require(scope)?;
    let _lease = ScopeLease::acquire(&paths, config.lease_timeout_ms).await?;
    let mut state = load_state(&paths).await?;
    let entry = require_entry(&state, id, scope)?;

    let mut existing = state.index.ids();
    existing.remove(id);
    let new_id = generate_id(entry.memory_type, new_title, &existing);

    let mut memory = store::read_memory(&paths, &entry.relative_path).await?;
    let now = clock::now();
    memory.front.id = new_id.clone();
    memory.front.title = new_title.to_string();
    memory.front.updated = now;
    let new_relative = memory.relative_path();

    store::write_memory(&paths, &memory).await?;
    if new_relative != entry.relative_path {
        store::delete_memory(&paths, &entry.relative_path).await?;
    }

    let mut new_entry = entry.clone();
    new_entry.id = new_id.clone();
    new_entry.relative_path = new_relative.clone();
    new_entry.updated = now;
    state.index = index::remove(&state.index, id);
    state.index = index::upsert(&state.index, new_entry);
    state.graph = graph::rename_node(&state.graph, id, &new_id);
    save_state(&paths, &state).await?;

    // The cached vector keys off the old id and the title changed anyway.
    invalidate_embedding(&paths, &[id]).await;

    info!(scope = %scope, old = %id, new = %new_id, "memory renamed");
    Ok(RenameResult {
        old_id: id.to_string(),
        new_id,
        relative_path: new_relative,
    })
}

/// Move a memory to another scope. Edges never cross scopes: incident edges
/// are severed on the source side and the target receives a bare node. The
/// result reports the severed count so callers can re-link.
pub async fn move_memory(
    resolver: &ScopeResolver,
    config: &Config,
    id: &str,
    from: ScopeKind,
    to: ScopeKind,
) -> Result<MoveResult> {
    if from == to {
        return Err(Error::Invalid("source and target scope are the same".into()));
    }

    let source_paths = resolver.require(from)?;
    let target_paths = resolver.require(to)?;

    // Leases in fixed precedence order so concurrent movers cannot deadlock.
    let order = |k: ScopeKind| ScopeKind::ALL.iter().position(|&s| s == k).unwrap_or(0);
    let (_first, _second) = if order(from) <= order(to) {
        let first = ScopeLease::acquire(&source_paths, config.lease_timeout_ms).await?;
        let second = ScopeLease::acquire(&target_paths, config.lease_timeout_ms).await?;
        (first, second)
    } else {
        let first = ScopeLease::acquire(&target_paths, config.lease_timeout_ms).await?;
        let second = ScopeLease::acquire(&source_paths, config.lease_timeout_ms).await?;
        (second, first)
    };

    let mut source_state = load_state(&source_paths).await?;
    let entry = require_entry(&source_state, id, from)?;
    let mut memory = store::read_memory(&source_paths, &entry.relative_path).await?;

    resolver.ensure_layout(&target_paths).await?;
    let mut target_state = load_state(&target_paths).await?;

    // Same-ID collisions in the target namespace get the usual suffix.
    let target_id = if target_state.index.contains(id) {
        generate_id(entry.memory_type, &memory.front.title, &target_state.index.ids())
    } else {
        id.to_string()
    };

    let now = clock::now();
    memory.front.id = target_id.clone();
    memory.front.scope = to;
    memory.front.updated = now;
    // Frontmatter links pointed at source-scope memories; they do not
    // survive the move, mirroring the graph.
    memory.front.links.clear();
    let target_relative = memory.relative_path();

    store::write_memory(&target_paths, &memory).await?;
    let mut target_entry = entry.clone();
    target_entry.id = target_id.clone();
    target_entry.relative_path = target_relative;
    target_entry.updated = now;
    target_entry.scope = to;
    target_state.index = index::upsert(&target_state.index, target_entry);
    target_state.graph = graph::add_node(&target_state.graph, &target_id, entry.memory_type);
    save_state(&target_paths, &target_state).await?;

    // Target committed; now clear the source side.
    store::delete_memory(&source_paths, &entry.relative_path).await?;
    source_state.index = index::remove(&source_state.index, id);
    let (next_graph, source_edges_removed) = graph::remove_node(&source_state.graph, id);
    source_state.graph = next_graph;
    save_state(&source_paths, &source_state).await?;
    invalidate_embedding(&source_paths, &[id]).await;

    info!(
        id = %id,
        from = %from,
        to = %to,
        source_edges_removed,
        "memory moved across scopes"
    );

    Ok(MoveResult {
        id: target_id,
        from,
        to,
        source_edges_removed,
        target_edges_created: 0,
    })
}

/// Promote a breadcrumb to a permanent type, or retype any memory. The file
/// is renamed with the new type prefix and moved between `permanent/` and
/// `temporary/` as needed; links survive because the scope does not change.
pub async fn promote(
    resolver: &ScopeResolver,
    config: &Config,
    scope: ScopeKind,
    id: &str,
    new_type: MemoryType,
) -> Result<PromoteResult> {
    let paths = resolver.require(scope)?;
    let _lease = ScopeLease::acquire(&paths, config.lease_timeout_ms).await?;
    let mut state = load_state(&paths).await?;
    let entry = require_entry(&state, id, scope)?;

    if entry.memory_type == new_type {
        return Err(Error::Invalid(format!(
            "'{id}' already has type {new_type}"
        )));
    }

    let mut memory = store::read_memory(&paths, &entry.relative_path).await?;
    let mut existing = state.index.ids();
    existing.remove(id);
    let new_id = generate_id(new_type, &memory.front.title, &existing);

    let now = clock::now();
    memory.front.id = new_id.clone();
    memory.front.memory_type = new_type;
    memory.front.updated = now;
    let new_relative = memory.relative_path();

    store::write_memory(&paths, &memory).await?;
    if new_relative != entry.relative_path {
        store::delete_memory(&paths, &entry.relative_path).await?;
    }

    let mut new_entry = entry.clone();
    new_entry.id = new_id.clone();
    new_entry.relative_path = new_relative.clone();
    new_entry.memory_type = new_type;
    new_entry.updated = now;
    state.index = index::remove(&state.index, id);
    state.index = index::upsert(&state.index, new_entry);
    state.graph = graph::rename_node(&state.graph, id, &new_id);
    state.graph = graph::add_node(&state.graph, &new_id, new_type);
    save_state(&paths, &state).await?;
    invalidate_embedding(&paths, &[id]).await;

    info!(scope = %scope, old = %id, new = %new_id, r#type = %new_type, "memory promoted");
    Ok(PromoteResult {
        old_id: id.to_string(),
        new_id,
        memory_type: new_type,
        relative_path: new_relative,
    })
}

/// Move a memory under `archive/`, removing it from the live index and
/// graph. The embedding entry is dropped unless `keep_embedding` is set.
pub async fn archive(
    resolver: &ScopeResolver,
    config: &Config,
    scope: ScopeKind,
    id: &str,
    keep_embedding: bool,
) -> Result<ArchiveResult> {
    let paths = resolver.require(scope)?;
    let _lease = ScopeLease::acquire(&paths, config.lease_timeout_ms).await?;
    let mut state = load_state(&paths).await?;
    let entry = require_entry(&state, id, scope)?;

    let archived_relative = format!("archive/{id}.md");
    store::rename_memory(&paths, &entry.relative_path, &archived_relative).await?;

    state.index = index::remove(&state.index, id);
    let (next_graph, edges_removed) = graph::remove_node(&state.graph, id);
    state.graph = next_graph;
    save_state(&paths, &state).await?;
    if !keep_embedding {
        invalidate_embedding(&paths, &[id]).await;
    }

    info!(scope = %scope, id = %id, edges_removed, "memory archived");
    Ok(ArchiveResult {
        id: id.to_string(),
        edges_removed,
        relative_path: archived_relative,
    })
}

/// Delete a memory: file, index entry, graph node (cascading edges), and
/// embedding entry.
pub async fn delete(
    resolver: &ScopeResolver,
    config: &Config,
    scope: ScopeKind,
    id: &str,
) -> Result<DeleteResult> {
    let paths = resolver.require(scope)?;
    let _lease = ScopeLease::acquire(&paths, config.lease_timeout_ms).await?;
    let mut state = load_state(&paths).await?;
    let entry = require_entry(&state, id, scope)?;

    store::delete_memory(&paths, &entry.relative_path).await?;
    state.index = index::remove(&state.index, id);
    let (next_graph, edges_removed) = graph::remove_node(&state.graph, id);
    state.graph = next_graph;
    save_state(&paths, &state).await?;
    invalidate_embedding(&paths, &[id]).await;

    info!(scope = %scope, id = %id, edges_removed, "memory deleted");
    Ok(DeleteResult {
        id: id.to_string(),
        edges_removed,
    })
}

/// Drop embedding entries for the given IDs. Best-effort: cache problems
/// are logged, never surfaced — the cache is derived state.
pub(crate) async fn invalidate_embedding(paths: &ScopePaths, ids: &[&str]) {
    match cache::load(paths).await {
        Ok(mut embeddings) => {
            let mut changed = false;
            for id in ids {
                changed |= embeddings.memories.remove(*id).is_some();
            }
            if changed {
                if let Err(e) = cache::save(paths, &embeddings).await {
                    warn!(error = %e, "embedding cache save failed");
                }
            }
        }
        Err(e) => warn!(error = %e, "embedding cache unreadable"),
    }
}
