use serde::Serialize;
use tracing::{info, warn};

use crate::clock;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::graph;
use crate::index;
use crate::lease::ScopeLease;
use crate::memory::{generate_id, MemoryType};
use crate::scope::{ScopeKind, ScopeResolver};
use crate::store;

use super::{load_state, save_state};

/// Per-item outcome of a bulk operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkStatus {
    Ok,
    Skipped,
    Error,
}

/// One item's result line in a bulk summary.
#[derive(Debug, Clone, Serialize)]
pub struct BulkItem {
    pub id: String,
    pub status: BulkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "newId", skip_serializing_if = "Option::is_none")]
    pub new_id: Option<String>,
}

impl BulkItem {
    fn ok(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: BulkStatus::Ok,
            error: None,
            new_id: None,
        }
    }

    fn renamed(id: &str, new_id: String) -> Self {
        Self {
            id: id.to_string(),
            status: BulkStatus::Ok,
            error: None,
            new_id: Some(new_id),
        }
    }

    fn skipped(id: &str, reason: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            status: BulkStatus::Skipped,
            error: Some(reason.into()),
            new_id: None,
        }
    }

    fn error(id: &str, error: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            status: BulkStatus::Error,
            error: Some(error.into()),
            new_id: None,
        }
    }
}

/// Aggregate result of a bulk operation. Bulk ops never halt on a single
/// failure; they accumulate per-item results.
#[derive(Debug, Clone, Serialize)]
pub struct BulkSummary {
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub status: &'static str,
    pub items: Vec<BulkItem>,
}

impl BulkSummary {
    fn from_items(items: Vec<BulkItem>) -> Self {
        let processed = items.iter().filter(|i| i.status == BulkStatus::Ok).count();
        let skipped = items
            .iter()
            .filter(|i| i.status == BulkStatus::Skipped)
            .count();
        let errors = items
            .iter()
            .filter(|i| i.status == BulkStatus::Error)
            .count();
        let status = if errors == 0 && skipped == 0 {
            "success"
        } else if processed > 0 {
            "partial"
        } else {
            "error"
        };
        Self {
            processed,
            skipped,
            errors,
            status,
            items,
        }
    }
}

/// Delete many memories with exactly one index and one graph write.
pub async fn bulk_delete(
    resolver: &ScopeResolver,
    config: &Config,
    scope: ScopeKind,
    ids: &[String],
) -> Result<BulkSummary> {
    let paths = resolver.require(scope)?;
    let _lease = ScopeLease::acquire(&paths, config.lease_timeout_ms).await?;
    let mut state = load_state(&paths).await?;
    let mut items = Vec::with_capacity(ids.len());
    let mut removed_ids: Vec<&str> = Vec::new();

    for id in ids {
        let Some(entry) = state.index.find(id).cloned() else {
            items.push(BulkItem::error(id, "not found"));
            continue;
        };
        if let Err(e) = store::delete_memory(&paths, &entry.relative_path).await {
            items.push(BulkItem::error(id, e.to_string()));
            continue;
        }
        state.index = index::remove(&state.index, id);
        let (next, _) = graph::remove_node(&state.graph, id);
        state.graph = next;
        removed_ids.push(id);
        items.push(BulkItem::ok(id));
    }

    save_state(&paths, &state).await?;
    super::mutate::invalidate_embedding(&paths, &removed_ids).await;

    info!(scope = %scope, requested = ids.len(), deleted = removed_ids.len(), "bulk delete");
    Ok(BulkSummary::from_items(items))
}

/// Link many sources to one target in a single graph write.
pub async fn bulk_link(
    resolver: &ScopeResolver,
    config: &Config,
    scope: ScopeKind,
    sources: &[String],
    target: &str,
    label: Option<&str>,
) -> Result<BulkSummary> {
    let paths = resolver.require(scope)?;
    let _lease = ScopeLease::acquire(&paths, config.lease_timeout_ms).await?;
    let mut state = load_state(&paths).await?;
    let mut items = Vec::with_capacity(sources.len());

    let target_exists = state.index.contains(target);
    for source in sources {
        if !target_exists {
            items.push(BulkItem::error(source, format!("target '{target}' not found")));
            continue;
        }
        if source == target {
            items.push(BulkItem::skipped(source, "self-link"));
            continue;
        }
        let Some(entry) = state.index.find(source).cloned() else {
            items.push(BulkItem::error(source, "not found"));
            continue;
        };
        if !state.graph.has_node(source) {
            state.graph = graph::add_node(&state.graph, source, entry.memory_type);
        }
        let (next, added) = graph::add_edge(&state.graph, source, target, label);
        state.graph = next;
        if !added {
            items.push(BulkItem::skipped(source, "edge already exists"));
            continue;
        }
        match store::read_memory(&paths, &entry.relative_path).await {
            Ok(mut memory) => {
                if !memory.front.links.iter().any(|l| l == target) {
                    memory.front.links.push(target.to_string());
                    if let Err(e) = store::write_memory(&paths, &memory).await {
                        items.push(BulkItem::error(source, e.to_string()));
                        continue;
                    }
                }
                items.push(BulkItem::ok(source));
            }
            Err(e) => {
                warn!(id = %source, error = %e, "frontmatter links not updated");
                items.push(BulkItem::ok(source));
            }
        }
    }

    if state.index.contains(target) && !state.graph.has_node(target) {
        if let Some(entry) = state.index.find(target) {
            state.graph = graph::add_node(&state.graph, target, entry.memory_type);
        }
    }
    graph::save(&paths, &state.graph, state.index.len()).await?;
    Ok(BulkSummary::from_items(items))
}

/// Remove edges from many sources to one target in a single graph write.
pub async fn bulk_unlink(
    resolver: &ScopeResolver,
    config: &Config,
    scope: ScopeKind,
    sources: &[String],
    target: &str,
) -> Result<BulkSummary> {
    let paths = resolver.require(scope)?;
    let _lease = ScopeLease::acquire(&paths, config.lease_timeout_ms).await?;
    let mut state = load_state(&paths).await?;
    let mut items = Vec::with_capacity(sources.len());

    for source in sources {
        let (next, removed) = graph::remove_edge(&state.graph, source, target, None);
        state.graph = next;
        if removed == 0 {
            items.push(BulkItem::skipped(source, "no matching edge"));
            continue;
        }
        if let Some(entry) = state.index.find(source) {
            if let Ok(mut memory) = store::read_memory(&paths, &entry.relative_path).await {
                let before = memory.front.links.len();
                memory.front.links.retain(|l| l != target);
                if memory.front.links.len() != before {
                    if let Err(e) = store::write_memory(&paths, &memory).await {
                        warn!(id = %source, error = %e, "frontmatter links not updated");
                    }
                }
            }
        }
        items.push(BulkItem::ok(source));
    }

    graph::save(&paths, &state.graph, state.index.len()).await?;
    Ok(BulkSummary::from_items(items))
}

/// Tag many memories with one index write.
pub async fn bulk_tag(
    resolver: &ScopeResolver,
    config: &Config,
    scope: ScopeKind,
    ids: &[String],
    tags: &[String],
) -> Result<BulkSummary> {
    let incoming = super::write::normalize_tags(tags)?;
    if incoming.is_empty() {
        return Err(Error::Invalid("no tags given".into()));
    }

    let paths = resolver.require(scope)?;
    let _lease = ScopeLease::acquire(&paths, config.lease_timeout_ms).await?;
    let mut state = load_state(&paths).await?;
    let mut items = Vec::with_capacity(ids.len());
    let now = clock::now();

    for id in ids {
        let Some(entry) = state.index.find(id).cloned() else {
            items.push(BulkItem::error(id, "not found"));
            continue;
        };
        let mut memory = match store::read_memory(&paths, &entry.relative_path).await {
            Ok(memory) => memory,
            Err(e) => {
                items.push(BulkItem::error(id, e.to_string()));
                continue;
            }
        };
        for tag in &incoming {
            if !memory.front.tags.contains(tag) {
                memory.front.tags.push(tag.clone());
            }
        }
        memory.front.updated = now;
        if let Err(e) = store::write_memory(&paths, &memory).await {
            items.push(BulkItem::error(id, e.to_string()));
            continue;
        }
        let mut updated_entry = entry;
        updated_entry.tags = memory.front.tags.clone();
        updated_entry.updated = now;
        state.index = index::upsert(&state.index, updated_entry);
        items.push(BulkItem::ok(id));
    }

    index::save(&paths, &state.index).await?;
    Ok(BulkSummary::from_items(items))
}

/// Promote many memories with one index and one graph write.
pub async fn bulk_promote(
    resolver: &ScopeResolver,
    config: &Config,
    scope: ScopeKind,
    ids: &[String],
    new_type: MemoryType,
) -> Result<BulkSummary> {
    let paths = resolver.require(scope)?;
    let _lease = ScopeLease::acquire(&paths, config.lease_timeout_ms).await?;
    let mut state = load_state(&paths).await?;
    let mut items = Vec::with_capacity(ids.len());
    let mut invalidated: Vec<String> = Vec::new();
    let now = clock::now();

    for id in ids {
        let Some(entry) = state.index.find(id).cloned() else {
            items.push(BulkItem::error(id, "not found"));
            continue;
        };
        if entry.memory_type == new_type {
            items.push(BulkItem::skipped(id, format!("already {new_type}")));
            continue;
        }
        let mut memory = match store::read_memory(&paths, &entry.relative_path).await {
            Ok(memory) => memory,
            Err(e) => {
                items.push(BulkItem::error(id, e.to_string()));
                continue;
            }
        };

        let mut existing = state.index.ids();
        existing.remove(id);
        let new_id = generate_id(new_type, &memory.front.title, &existing);

        memory.front.id = new_id.clone();
        memory.front.memory_type = new_type;
        memory.front.updated = now;
        let new_relative = memory.relative_path();

        if let Err(e) = store::write_memory(&paths, &memory).await {
            items.push(BulkItem::error(id, e.to_string()));
            continue;
        }
        if new_relative != entry.relative_path {
            if let Err(e) = store::delete_memory(&paths, &entry.relative_path).await {
                warn!(id = %id, error = %e, "old file not removed, run sync to reconcile");
            }
        }

        let mut new_entry = entry;
        new_entry.id = new_id.clone();
        new_entry.relative_path = new_relative;
        new_entry.memory_type = new_type;
        new_entry.updated = now;
        state.index = index::remove(&state.index, id);
        state.index = index::upsert(&state.index, new_entry);
        state.graph = graph::rename_node(&state.graph, id, &new_id);
        state.graph = graph::add_node(&state.graph, &new_id, new_type);
        invalidated.push(id.clone());
        items.push(BulkItem::renamed(id, new_id));
    }

    save_state(&paths, &state).await?;
    let refs: Vec<&str> = invalidated.iter().map(String::as_str).collect();
    super::mutate::invalidate_embedding(&paths, &refs).await;
    Ok(BulkSummary::from_items(items))
}

/// Move many memories to another scope. One load and one save per scope;
/// the operation is not atomic across the pair and partial completion is
/// reported per item.
pub async fn bulk_move(
    resolver: &ScopeResolver,
    config: &Config,
    ids: &[String],
    from: ScopeKind,
    to: ScopeKind,
) -> Result<BulkSummary> {
    if from == to {
        return Err(Error::Invalid("source and target scope are the same".into()));
    }
    let source_paths = resolver.require(from)?;
    let target_paths = resolver.require(to)?;

    let order = |k: ScopeKind| ScopeKind::ALL.iter().position(|&s| s == k).unwrap_or(0);
    let (_first, _second) = if order(from) <= order(to) {
        let a = ScopeLease::acquire(&source_paths, config.lease_timeout_ms).await?;
        let b = ScopeLease::acquire(&target_paths, config.lease_timeout_ms).await?;
        (a, b)
    } else {
        let a = ScopeLease::acquire(&target_paths, config.lease_timeout_ms).await?;
        let b = ScopeLease::acquire(&source_paths, config.lease_timeout_ms).await?;
        (b, a)
    };

    resolver.ensure_layout(&target_paths).await?;
    let mut source_state = load_state(&source_paths).await?;
    let mut target_state = load_state(&target_paths).await?;
    let mut items = Vec::with_capacity(ids.len());
    let mut moved: Vec<String> = Vec::new();
    let now = clock::now();

    for id in ids {
        let Some(entry) = source_state.index.find(id).cloned() else {
            items.push(BulkItem::error(id, "not found"));
            continue;
        };
        let mut memory = match store::read_memory(&source_paths, &entry.relative_path).await {
            Ok(memory) => memory,
            Err(e) => {
                items.push(BulkItem::error(id, e.to_string()));
                continue;
            }
        };

        let target_id = if target_state.index.contains(id) {
            generate_id(
                entry.memory_type,
                &memory.front.title,
                &target_state.index.ids(),
            )
        } else {
            id.clone()
        };

        memory.front.id = target_id.clone();
        memory.front.scope = to;
        memory.front.updated = now;
        memory.front.links.clear();
        let target_relative = memory.relative_path();

        if let Err(e) = store::write_memory(&target_paths, &memory).await {
            items.push(BulkItem::error(id, e.to_string()));
            continue;
        }

        let mut target_entry = entry.clone();
        target_entry.id = target_id.clone();
        target_entry.relative_path = target_relative;
        target_entry.updated = now;
        target_entry.scope = to;
        target_state.index = index::upsert(&target_state.index, target_entry);
        target_state.graph = graph::add_node(&target_state.graph, &target_id, entry.memory_type);

        // Target committed; the source index and graph only change once the
        // source file is actually gone.
        if let Err(e) = store::delete_memory(&source_paths, &entry.relative_path).await {
            warn!(id = %id, error = %e, "source file not removed, run sync to reconcile");
            items.push(BulkItem::error(id, e.to_string()));
            continue;
        }
        source_state.index = index::remove(&source_state.index, id);
        let (next, _) = graph::remove_node(&source_state.graph, id);
        source_state.graph = next;
        moved.push(id.clone());

        if target_id != *id {
            items.push(BulkItem::renamed(id, target_id));
        } else {
            items.push(BulkItem::ok(id));
        }
    }

    save_state(&target_paths, &target_state).await?;
    save_state(&source_paths, &source_state).await?;
    let refs: Vec<&str> = moved.iter().map(String::as_str).collect();
    super::mutate::invalidate_embedding(&source_paths, &refs).await;

    info!(from = %from, to = %to, moved = moved.len(), "bulk move");
    Ok(BulkSummary::from_items(items))
}
