use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::graph::{self, GraphEdge};
use crate::index;
use crate::lease::ScopeLease;
use crate::scope::{ScopeKind, ScopeResolver};
use crate::store;

use super::load_state;

/// Result of a link mutation.
#[derive(Debug, Clone, Serialize)]
pub struct LinkResult {
    pub source: String,
    pub target: String,
    pub added: bool,
    #[serde(rename = "edgeCount")]
    pub edge_count: usize,
}

/// Result of an unlink mutation.
#[derive(Debug, Clone, Serialize)]
pub struct UnlinkResult {
    pub source: String,
    pub target: String,
    pub removed: usize,
    #[serde(rename = "edgeCount")]
    pub edge_count: usize,
}

/// Add a directed edge between two in-scope memories. Idempotent; duplicate
/// edges are ignored. The source memory's frontmatter `links` is kept in
/// step with the graph.
pub async fn link(
    resolver: &ScopeResolver,
    config: &Config,
    scope: ScopeKind,
    source: &str,
    target: &str,
    label: Option<&str>,
) -> Result<LinkResult> {
    if source == target {
        return Err(Error::Invalid("cannot link a memory to itself".into()));
    }

    let paths = resolver.require(scope)?;
    let _lease = ScopeLease::acquire(&paths, config.lease_timeout_ms).await?;
    let mut state = load_state(&paths).await?;

    let source_entry = state
        .index
        .find(source)
        .cloned()
        .ok_or_else(|| Error::not_found(source, scope))?;
    if !state.index.contains(target) {
        return Err(Error::not_found(target, scope));
    }

    // Nodes may be missing after external edits; re-attach rather than fail.
    if !state.graph.has_node(source) {
        state.graph = graph::add_node(&state.graph, source, source_entry.memory_type);
    }
    if let Some(target_entry) = state.index.find(target) {
        if !state.graph.has_node(target) {
            state.graph = graph::add_node(&state.graph, target, target_entry.memory_type);
        }
    }

    let (next, added) = graph::add_edge(&state.graph, source, target, label);
    state.graph = next;

    if added {
        let mut memory = store::read_memory(&paths, &source_entry.relative_path).await?;
        if !memory.front.links.iter().any(|l| l == target) {
            memory.front.links.push(target.to_string());
            store::write_memory(&paths, &memory).await?;
        }
        graph::save(&paths, &state.graph, state.index.len()).await?;
        info!(scope = %scope, source = %source, target = %target, "edge added");
    }

    Ok(LinkResult {
        source: source.to_string(),
        target: target.to_string(),
        added,
        edge_count: state.graph.edges.len(),
    })
}

/// Remove matching edges. Idempotent; removing an absent edge is a no-op.
pub async fn unlink(
    resolver: &ScopeResolver,
    config: &Config,
    scope: ScopeKind,
    source: &str,
    target: &str,
    label: Option<&str>,
) -> Result<UnlinkResult> {
    let paths = resolver.require(scope)?;
    let _lease = ScopeLease::acquire(&paths, config.lease_timeout_ms).await?;
    let mut state = load_state(&paths).await?;

    let (next, removed) = graph::remove_edge(&state.graph, source, target, label);
    state.graph = next;

    if removed > 0 {
        if let Some(source_entry) = state.index.find(source) {
            if let Ok(mut memory) = store::read_memory(&paths, &source_entry.relative_path).await {
                let before = memory.front.links.len();
                memory.front.links.retain(|l| l != target);
                if memory.front.links.len() != before {
                    store::write_memory(&paths, &memory).await?;
                }
            }
        }
        graph::save(&paths, &state.graph, state.index.len()).await?;
        info!(scope = %scope, source = %source, target = %target, removed, "edges removed");
    }

    Ok(UnlinkResult {
        source: source.to_string(),
        target: target.to_string(),
        removed,
        edge_count: state.graph.edges.len(),
    })
}

/// Edge listing for a scope, optionally restricted to edges touching one ID.
pub async fn edges(
    resolver: &ScopeResolver,
    scope: ScopeKind,
    id: Option<&str>,
) -> Result<Vec<GraphEdge>> {
    let Some(paths) = resolver.resolve(scope) else {
        return Ok(Vec::new());
    };
    let g = graph::load(&paths).await?;
    Ok(match id {
        Some(id) => g.incident(id).into_iter().cloned().collect(),
        None => g.edges,
    })
}

/// Drop a graph node (and incident edges) without touching files or index.
/// A reconciliation affordance for ghost nodes.
pub async fn remove_node(
    resolver: &ScopeResolver,
    config: &Config,
    scope: ScopeKind,
    id: &str,
) -> Result<usize> {
    let paths = resolver.require(scope)?;
    let _lease = ScopeLease::acquire(&paths, config.lease_timeout_ms).await?;
    let mut state = load_state(&paths).await?;

    if !state.graph.has_node(id) {
        return Err(Error::not_found(id, scope));
    }
    let (next, removed_edges) = graph::remove_node(&state.graph, id);
    state.graph = next;
    graph::save(&paths, &state.graph, state.index.len()).await?;
    info!(scope = %scope, id = %id, removed_edges, "graph node removed");
    Ok(removed_edges)
}

/// Load a scope's graph document for the `graph` and `mermaid` commands.
pub async fn graph_document(
    resolver: &ScopeResolver,
    scope: ScopeKind,
) -> Result<crate::graph::MemoryGraph> {
    match resolver.resolve(scope) {
        Some(paths) => graph::load(&paths).await,
        None => Ok(crate::graph::MemoryGraph::empty()),
    }
}

