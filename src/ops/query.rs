use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock;
use crate::config::Config;
use crate::embedding::cache;
use crate::embedding::provider::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::frontmatter::Frontmatter;
use crate::graph::{self, Direction};
use crate::index::{self, IndexEntry};
use crate::lease::ScopeLease;
use crate::memory::{generate_id, Memory, MemoryType, Severity};
use crate::scope::{ScopeKind, ScopeResolver};
use crate::search;
use crate::store;

use super::load_state;

fn selected_scopes(requested: &[ScopeKind]) -> Vec<ScopeKind> {
    if requested.is_empty() {
        ScopeKind::ALL.to_vec()
    } else {
        requested.to_vec()
    }
}

/// Merged index listing across scopes in precedence order. Duplicate IDs
/// across scopes are kept; each scope is its own namespace.
pub async fn list(
    resolver: &ScopeResolver,
    scopes: &[ScopeKind],
    memory_type: Option<MemoryType>,
    tag: Option<&str>,
) -> Result<Vec<IndexEntry>> {
    let mut out = Vec::new();
    for kind in selected_scopes(scopes) {
        let Some(paths) = resolver.resolve(kind) else {
            continue;
        };
        let idx = index::load(&paths).await?;
        out.extend(idx.memories.into_iter().filter(|e| {
            memory_type.map_or(true, |t| e.memory_type == t)
                && tag.map_or(true, |t| e.tags.iter().any(|x| x == t))
        }));
    }
    Ok(out)
}

/// Structured filter for [`query`].
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub scopes: Vec<ScopeKind>,
    pub memory_type: Option<MemoryType>,
    pub tag: Option<String>,
    pub severity: Option<Severity>,
    pub project: Option<String>,
    /// Case-insensitive substring over title and body.
    pub text: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

/// One row returned by [`query`].
#[derive(Debug, Clone, Serialize)]
pub struct QueryHit {
    pub scope: ScopeKind,
    pub id: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub title: String,
    pub tags: Vec<String>,
    #[serde(with = "crate::clock::serde_millis")]
    pub updated: DateTime<Utc>,
}

/// Structured filtering across scopes. Filters that live in frontmatter
/// only (severity, project, text) read the files; index-only filters do not.
pub async fn query(resolver: &ScopeResolver, filter: &QueryFilter) -> Result<Vec<QueryHit>> {
    let needs_file = filter.severity.is_some() || filter.project.is_some() || filter.text.is_some();
    let mut hits = Vec::new();

    for kind in selected_scopes(&filter.scopes) {
        let Some(paths) = resolver.resolve(kind) else {
            continue;
        };
        let idx = index::load(&paths).await?;
        for entry in idx.memories {
            if let Some(t) = filter.memory_type {
                if entry.memory_type != t {
                    continue;
                }
            }
            if let Some(tag) = &filter.tag {
                if !entry.tags.iter().any(|x| x == tag) {
                    continue;
                }
            }
            if let Some(since) = filter.since {
                if entry.updated < since {
                    continue;
                }
            }

            let title = if needs_file {
                let memory = match store::read_memory(&paths, &entry.relative_path).await {
                    Ok(memory) => memory,
                    Err(e) => {
                        warn!(id = %entry.id, error = %e, "skipping unreadable memory");
                        continue;
                    }
                };
                if let Some(severity) = filter.severity {
                    if memory.front.severity != Some(severity) {
                        continue;
                    }
                }
                if let Some(project) = &filter.project {
                    if memory.front.project.as_deref() != Some(project.as_str()) {
                        continue;
                    }
                }
                if let Some(text) = &filter.text {
                    let needle = text.to_lowercase();
                    let haystack = format!(
                        "{}\n{}",
                        memory.front.title.to_lowercase(),
                        memory.body.to_lowercase()
                    );
                    if !haystack.contains(&needle) {
                        continue;
                    }
                }
                memory.front.title
            } else {
                entry.id.clone()
            };

            hits.push(QueryHit {
                scope: kind,
                id: entry.id,
                memory_type: entry.memory_type,
                title,
                tags: entry.tags,
                updated: entry.updated,
            });
        }
    }
    Ok(hits)
}

/// Per-scope statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ScopeStats {
    pub scope: ScopeKind,
    pub memories: usize,
    #[serde(rename = "byType")]
    pub by_type: BTreeMap<String, usize>,
    #[serde(rename = "topTags")]
    pub top_tags: Vec<TagCount>,
    pub nodes: usize,
    pub edges: usize,
    pub orphans: usize,
    pub embeddings: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

/// Aggregate statistics report.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub scopes: Vec<ScopeStats>,
    pub total: usize,
}

/// Counts by scope, type, and tag, plus graph degree information.
pub async fn stats(resolver: &ScopeResolver, scopes: &[ScopeKind]) -> Result<StatsReport> {
    let mut out = Vec::new();
    let mut total = 0;
    for kind in selected_scopes(scopes) {
        let Some(paths) = resolver.resolve(kind) else {
            continue;
        };
        let idx = index::load(&paths).await?;
        let g = graph::load(&paths).await?;
        let embeddings = cache::load(&paths).await?;

        let mut by_type = BTreeMap::new();
        let mut tag_counts: HashMap<String, usize> = HashMap::new();
        for entry in &idx.memories {
            *by_type.entry(entry.memory_type.to_string()).or_insert(0) += 1;
            for tag in &entry.tags {
                *tag_counts.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        let mut top_tags: Vec<TagCount> = tag_counts
            .into_iter()
            .map(|(tag, count)| TagCount { tag, count })
            .collect();
        top_tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
        top_tags.truncate(10);

        total += idx.len();
        out.push(ScopeStats {
            scope: kind,
            memories: idx.len(),
            by_type,
            top_tags,
            nodes: g.nodes.len(),
            edges: g.edges.len(),
            orphans: g.orphans().len(),
            embeddings: embeddings.memories.len(),
        });
    }
    Ok(StatsReport { scopes: out, total })
}

/// Per-scope status line for the `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct ScopeStatus {
    pub scope: ScopeKind,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memories: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edges: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<usize>,
    pub locked: bool,
}

/// Availability and counts for every scope.
pub async fn status(resolver: &ScopeResolver) -> Result<Vec<ScopeStatus>> {
    let mut out = Vec::new();
    for kind in ScopeKind::ALL {
        match resolver.resolve(kind) {
            None => out.push(ScopeStatus {
                scope: kind,
                available: false,
                memories: None,
                nodes: None,
                edges: None,
                embeddings: None,
                locked: false,
            }),
            Some(paths) => {
                let idx = index::load(&paths).await?;
                let g = graph::load(&paths).await?;
                let embeddings = cache::load(&paths).await?;
                out.push(ScopeStatus {
                    scope: kind,
                    available: true,
                    memories: Some(idx.len()),
                    nodes: Some(g.nodes.len()),
                    edges: Some(g.edges.len()),
                    embeddings: Some(embeddings.memories.len()),
                    locked: paths.lock_path().exists(),
                });
            }
        }
    }
    Ok(out)
}

/// Impact analysis: everything reachable from an ID within `depth` hops,
/// following edges in both directions.
#[derive(Debug, Clone, Serialize)]
pub struct ImpactReport {
    pub id: String,
    pub depth: usize,
    pub reachable: Vec<graph::BfsVisit>,
}

pub async fn impact(
    resolver: &ScopeResolver,
    scope: ScopeKind,
    id: &str,
    depth: usize,
) -> Result<ImpactReport> {
    let paths = resolver.require(scope)?;
    let idx = index::load(&paths).await?;
    if !idx.contains(id) {
        return Err(Error::not_found(id, scope));
    }
    let g = graph::load(&paths).await?;
    let reachable = graph::bfs(&g, id, depth, Direction::Both);
    Ok(ImpactReport {
        id: id.to_string(),
        depth,
        reachable,
    })
}

/// A candidate produced by [`suggest_links`].
#[derive(Debug, Clone, Serialize)]
pub struct SuggestedLink {
    pub id: String,
    pub score: f64,
    pub method: search::SearchMethod,
}

/// Ranked, not-yet-linked, same-scope candidates for an ID. Semantic when
/// cached vectors allow it, keyword otherwise. The post-move re-link
/// affordance.
pub async fn suggest_links(
    resolver: &ScopeResolver,
    config: &Config,
    provider: Option<&dyn EmbeddingProvider>,
    scope: ScopeKind,
    id: &str,
    limit: usize,
) -> Result<Vec<SuggestedLink>> {
    let paths = resolver.require(scope)?;
    let state = load_state(&paths).await?;
    let entry = state
        .index
        .find(id)
        .cloned()
        .ok_or_else(|| Error::not_found(id, scope))?;
    let source = store::read_memory(&paths, &entry.relative_path).await?;

    let linked: HashSet<&str> = state
        .graph
        .edges
        .iter()
        .filter(|e| e.source == id)
        .map(|e| e.target.as_str())
        .collect();

    let candidates: Vec<&IndexEntry> = state
        .index
        .memories
        .iter()
        .filter(|e| {
            e.id != id
                && e.memory_type != MemoryType::Breadcrumb
                && !linked.contains(e.id.as_str())
        })
        .collect();

    // Semantic ranking over cached vectors when the provider is reachable.
    if let Some(provider) = provider {
        if provider.probe().await {
            let embeddings = cache::load(&paths).await?;
            let (input, _) = cache::embedding_input(&source.front.title, &source.body);
            let inputs = [input];
            if let Ok(vectors) = provider.embed_batch(&inputs).await {
                if let Some(source_vector) = vectors.into_iter().next().filter(|v| !v.is_empty()) {
                    let mut suggestions: Vec<SuggestedLink> = candidates
                        .iter()
                        .filter_map(|candidate| {
                            let cached = embeddings.memories.get(&candidate.id)?;
                            let score = cache::cosine(&source_vector, &cached.vector);
                            (score >= config.inject_threshold).then(|| SuggestedLink {
                                id: candidate.id.clone(),
                                score,
                                method: search::SearchMethod::Semantic,
                            })
                        })
                        .collect();
                    if !suggestions.is_empty() {
                        suggestions.sort_by(|a, b| {
                            b.score
                                .partial_cmp(&a.score)
                                .unwrap_or(std::cmp::Ordering::Equal)
                        });
                        suggestions.truncate(limit);
                        return Ok(suggestions);
                    }
                }
            }
        }
    }

    // Keyword fallback: token overlap between the source memory and each
    // candidate's title, tags, and body.
    let mut terms: Vec<String> = search::tokenize(&source.front.title);
    for tag in &source.front.tags {
        terms.extend(search::tokenize(tag));
    }
    terms.sort();
    terms.dedup();

    let mut suggestions = Vec::new();
    for candidate in candidates {
        let memory = match store::read_memory(&paths, &candidate.relative_path).await {
            Ok(memory) => memory,
            Err(_) => continue,
        };
        let text = format!(
            "{} {} {}",
            memory.front.title,
            memory.front.tags.join(" "),
            memory.body
        );
        let tokens = search::tokenize(&text);
        let score = terms
            .iter()
            .map(|t| tokens.iter().filter(|x| *x == t).count() as f64)
            .sum::<f64>();
        if score > 0.0 {
            suggestions.push(SuggestedLink {
                id: candidate.id.clone(),
                score,
                method: search::SearchMethod::Keyword,
            });
        }
    }
    suggestions.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    suggestions.truncate(limit);
    Ok(suggestions)
}

/// Per-scope digest for the `summarize` command.
#[derive(Debug, Clone, Serialize)]
pub struct ScopeSummary {
    pub scope: ScopeKind,
    pub total: usize,
    #[serde(rename = "byType")]
    pub by_type: BTreeMap<String, usize>,
    #[serde(rename = "topTags")]
    pub top_tags: Vec<TagCount>,
    #[serde(rename = "mostLinked")]
    pub most_linked: Vec<DegreeEntry>,
    pub recent: Vec<RecentEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DegreeEntry {
    pub id: String,
    pub degree: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentEntry {
    pub id: String,
    #[serde(with = "crate::clock::serde_millis")]
    pub updated: DateTime<Utc>,
}

/// Digest of one or all scopes: counts by type, top tags, most-linked
/// memories, recent activity.
pub async fn summarize(
    resolver: &ScopeResolver,
    scope: Option<ScopeKind>,
) -> Result<Vec<ScopeSummary>> {
    let scopes = match scope {
        Some(kind) => vec![kind],
        None => ScopeKind::ALL.to_vec(),
    };

    let mut out = Vec::new();
    for kind in scopes {
        let Some(paths) = resolver.resolve(kind) else {
            continue;
        };
        let idx = index::load(&paths).await?;
        let g = graph::load(&paths).await?;

        let mut by_type = BTreeMap::new();
        let mut tag_counts: HashMap<String, usize> = HashMap::new();
        for entry in &idx.memories {
            *by_type.entry(entry.memory_type.to_string()).or_insert(0) += 1;
            for tag in &entry.tags {
                *tag_counts.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        let mut top_tags: Vec<TagCount> = tag_counts
            .into_iter()
            .map(|(tag, count)| TagCount { tag, count })
            .collect();
        top_tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
        top_tags.truncate(10);

        let mut degrees: Vec<DegreeEntry> = g
            .nodes
            .iter()
            .map(|n| DegreeEntry {
                id: n.id.clone(),
                degree: g.incident(&n.id).len(),
            })
            .filter(|d| d.degree > 0)
            .collect();
        degrees.sort_by(|a, b| b.degree.cmp(&a.degree).then_with(|| a.id.cmp(&b.id)));
        degrees.truncate(5);

        // Index entries are ordered by recency on disk.
        let recent: Vec<RecentEntry> = idx
            .memories
            .iter()
            .take(5)
            .map(|e| RecentEntry {
                id: e.id.clone(),
                updated: e.updated,
            })
            .collect();

        out.push(ScopeSummary {
            scope: kind,
            total: idx.len(),
            by_type,
            top_tags,
            most_linked: degrees,
            recent,
        });
    }
    Ok(out)
}

/// Export document: every memory of the selected scopes, frontmatter plus
/// body, in one JSON document.
#[derive(Debug, Clone, Serialize)]
pub struct ExportDocument {
    pub version: u32,
    #[serde(rename = "exportedAt")]
    pub exported_at: String,
    pub memories: Vec<ExportedMemory>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportedMemory {
    #[serde(flatten)]
    pub front: Frontmatter,
    pub body: String,
}

pub async fn export(resolver: &ScopeResolver, scopes: &[ScopeKind]) -> Result<ExportDocument> {
    let mut memories = Vec::new();
    for kind in selected_scopes(scopes) {
        let Some(paths) = resolver.resolve(kind) else {
            continue;
        };
        let idx = index::load(&paths).await?;
        let reads = idx
            .memories
            .iter()
            .map(|entry| store::read_memory(&paths, &entry.relative_path));
        for (entry, result) in idx.memories.iter().zip(join_all(reads).await) {
            match result {
                Ok(memory) => memories.push(ExportedMemory {
                    front: memory.front,
                    body: memory.body,
                }),
                Err(e) => warn!(id = %entry.id, error = %e, "skipping unreadable memory"),
            }
        }
    }
    Ok(ExportDocument {
        version: 1,
        exported_at: clock::format_timestamp(clock::now()),
        memories,
    })
}

/// Wire shape accepted by [`import`]; matches what [`export`] produces.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportDocument {
    #[serde(default)]
    pub memories: Vec<ImportedMemory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportedMemory {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub scope: ScopeKind,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub body: String,
}

/// Per-ID rename performed during import.
#[derive(Debug, Clone, Serialize)]
pub struct ImportRename {
    pub from: String,
    pub to: String,
}

/// Summary of an import run.
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub errors: usize,
    /// Memories that landed but whose frontmatter `links` could not be
    /// written back; the graph edge exists and `sync` will not undo it.
    #[serde(rename = "linkErrors")]
    pub link_errors: usize,
    pub renamed: Vec<ImportRename>,
}

/// Import memories, regenerating IDs on collision and recreating in-scope
/// links once every memory of a scope has landed.
pub async fn import(
    resolver: &ScopeResolver,
    config: &Config,
    document: ImportDocument,
    scope_override: Option<ScopeKind>,
) -> Result<ImportSummary> {
    let mut by_scope: BTreeMap<&'static str, (ScopeKind, Vec<ImportedMemory>)> = BTreeMap::new();
    for memory in document.memories {
        let kind = scope_override.unwrap_or(memory.scope);
        by_scope
            .entry(kind.as_str())
            .or_insert_with(|| (kind, Vec::new()))
            .1
            .push(memory);
    }

    let mut summary = ImportSummary {
        imported: 0,
        errors: 0,
        link_errors: 0,
        renamed: Vec::new(),
    };

    for (_, (kind, incoming)) in by_scope {
        let paths = resolver.require(kind)?;
        let _lease = ScopeLease::acquire(&paths, config.lease_timeout_ms).await?;
        resolver.ensure_layout(&paths).await?;
        let mut state = load_state(&paths).await?;

        // First pass: land every file under a unique ID.
        let mut id_map: HashMap<String, String> = HashMap::new();
        let mut landed: Vec<(String, Vec<String>)> = Vec::new();
        for item in incoming {
            let existing = state.index.ids();
            let requested = item.id.clone().unwrap_or_default();
            let final_id = if !requested.is_empty() && !existing.contains(&requested) {
                requested.clone()
            } else {
                generate_id(item.memory_type, &item.title, &existing)
            };
            if !requested.is_empty() && final_id != requested {
                summary.renamed.push(ImportRename {
                    from: requested.clone(),
                    to: final_id.clone(),
                });
            }
            if !requested.is_empty() {
                id_map.insert(requested, final_id.clone());
            }

            let now = clock::now();
            let created = item
                .created
                .as_deref()
                .and_then(clock::parse_timestamp)
                .unwrap_or(now);
            let updated = item
                .updated
                .as_deref()
                .and_then(clock::parse_timestamp)
                .unwrap_or(created);
            let tags = match super::write::normalize_tags(&item.tags) {
                Ok(tags) => tags,
                Err(e) => {
                    warn!(id = %final_id, error = %e, "import item rejected");
                    summary.errors += 1;
                    continue;
                }
            };

            let memory = Memory {
                front: Frontmatter {
                    id: final_id.clone(),
                    title: item.title.clone(),
                    memory_type: item.memory_type,
                    scope: kind,
                    tags: tags.clone(),
                    created,
                    updated,
                    severity: item.severity,
                    project: item.project.clone(),
                    links: Vec::new(),
                    embedding: None,
                },
                body: item.body.clone(),
            };
            if let Err(e) = store::write_memory(&paths, &memory).await {
                warn!(id = %final_id, error = %e, "import write failed");
                summary.errors += 1;
                continue;
            }

            state.index = index::upsert(
                &state.index,
                IndexEntry {
                    id: final_id.clone(),
                    relative_path: memory.relative_path(),
                    memory_type: item.memory_type,
                    tags,
                    created,
                    updated,
                    scope: kind,
                },
            );
            state.graph = graph::add_node(&state.graph, &final_id, item.memory_type);
            landed.push((final_id, item.links.clone()));
            summary.imported += 1;
        }

        // Second pass: recreate links whose targets landed in this scope.
        for (id, links) in &landed {
            let resolved: Vec<String> = links
                .iter()
                .map(|l| id_map.get(l).cloned().unwrap_or_else(|| l.clone()))
                .filter(|l| l != id && state.index.contains(l))
                .collect();
            if resolved.is_empty() {
                continue;
            }
            for target in &resolved {
                let (next, _) = graph::add_edge(&state.graph, id, target, None);
                state.graph = next;
            }
            if let Some(entry) = state.index.find(id) {
                if let Ok(mut memory) = store::read_memory(&paths, &entry.relative_path).await {
                    memory.front.links = resolved;
                    if let Err(e) = store::write_memory(&paths, &memory).await {
                        warn!(id = %id, error = %e, "failed to persist link back-reference");
                        summary.link_errors += 1;
                    }
                }
            }
        }

        super::save_state(&paths, &state).await?;
        info!(scope = %kind, imported = summary.imported, "import pass complete");
    }

    Ok(summary)
}
