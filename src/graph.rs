use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::memory::MemoryType;
use crate::scope::ScopePaths;
use crate::store;

/// Current graph document version.
pub const GRAPH_VERSION: u32 = 1;

/// A node mirrors a memory's existence within its scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
}

/// A directed, optionally labelled edge between two in-scope memories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// The per-scope `graph.json` document. All mutations are pure functions
/// returning a new graph; persistence is a separate step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryGraph {
    pub version: u32,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Traversal direction for [`bfs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

impl MemoryGraph {
    pub fn empty() -> Self {
        Self {
            version: GRAPH_VERSION,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Outgoing link targets of a node.
    pub fn neighbours(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.source == id)
            .map(|e| e.target.as_str())
            .collect()
    }

    /// All edges touching a node, in either direction.
    pub fn incident(&self, id: &str) -> Vec<&GraphEdge> {
        self.edges
            .iter()
            .filter(|e| e.source == id || e.target == id)
            .collect()
    }

    /// Nodes with no incident edges. Informational, not an error.
    pub fn orphans(&self) -> Vec<&GraphNode> {
        let mut connected: HashSet<&str> = HashSet::new();
        for edge in &self.edges {
            connected.insert(edge.source.as_str());
            connected.insert(edge.target.as_str());
        }
        self.nodes
            .iter()
            .filter(|n| !connected.contains(n.id.as_str()))
            .collect()
    }
}

/// Insert a node, or update its type if already present.
pub fn add_node(graph: &MemoryGraph, id: &str, memory_type: MemoryType) -> MemoryGraph {
    let mut next = graph.clone();
    match next.nodes.iter_mut().find(|n| n.id == id) {
        Some(node) => node.memory_type = memory_type,
        None => next.nodes.push(GraphNode {
            id: id.to_string(),
            memory_type,
        }),
    }
    next
}

/// Remove a node, cascading to every incident edge. Returns the new graph
/// and the number of edges removed.
pub fn remove_node(graph: &MemoryGraph, id: &str) -> (MemoryGraph, usize) {
    let mut next = graph.clone();
    next.nodes.retain(|n| n.id != id);
    let before = next.edges.len();
    next.edges.retain(|e| e.source != id && e.target != id);
    let removed = before - next.edges.len();
    (next, removed)
}

/// Insert a directed edge. Duplicates (same source, target, and label) are
/// ignored. Returns the new graph and whether an edge was added.
pub fn add_edge(
    graph: &MemoryGraph,
    source: &str,
    target: &str,
    label: Option<&str>,
) -> (MemoryGraph, bool) {
    let duplicate = graph
        .edges
        .iter()
        .any(|e| e.source == source && e.target == target && e.label.as_deref() == label);
    if duplicate {
        return (graph.clone(), false);
    }
    let mut next = graph.clone();
    next.edges.push(GraphEdge {
        source: source.to_string(),
        target: target.to_string(),
        label: label.map(str::to_string),
    });
    (next, true)
}

/// Remove matching edges. With `label: None` every edge between the pair is
/// removed; with a label only exact matches are. Returns the new graph and
/// the removal count.
pub fn remove_edge(
    graph: &MemoryGraph,
    source: &str,
    target: &str,
    label: Option<&str>,
) -> (MemoryGraph, usize) {
    let mut next = graph.clone();
    let before = next.edges.len();
    next.edges.retain(|e| {
        !(e.source == source
            && e.target == target
            && (label.is_none() || e.label.as_deref() == label))
    });
    let removed = before - next.edges.len();
    (next, removed)
}

/// Rewrite every edge endpoint referencing `old_id` to `new_id`, and the
/// node itself. Used by rename and promote.
pub fn rename_node(graph: &MemoryGraph, old_id: &str, new_id: &str) -> MemoryGraph {
    let mut next = graph.clone();
    for node in &mut next.nodes {
        if node.id == old_id {
            node.id = new_id.to_string();
        }
    }
    for edge in &mut next.edges {
        if edge.source == old_id {
            edge.source = new_id.to_string();
        }
        if edge.target == old_id {
            edge.target = new_id.to_string();
        }
    }
    next
}

/// One node reached by [`bfs`], with its distance from the start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BfsVisit {
    pub id: String,
    pub depth: usize,
}

/// Breadth-first traversal from `from`, bounded by `depth` hops. The start
/// node itself is not reported.
pub fn bfs(graph: &MemoryGraph, from: &str, depth: usize, direction: Direction) -> Vec<BfsVisit> {
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(from.to_string());
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    queue.push_back((from.to_string(), 0));
    let mut visits = Vec::new();

    while let Some((id, dist)) = queue.pop_front() {
        if dist >= depth {
            continue;
        }
        for edge in &graph.edges {
            let next = match direction {
                Direction::Outgoing if edge.source == id => Some(&edge.target),
                Direction::Incoming if edge.target == id => Some(&edge.source),
                Direction::Both if edge.source == id => Some(&edge.target),
                Direction::Both if edge.target == id => Some(&edge.source),
                _ => None,
            };
            if let Some(next_id) = next {
                if seen.insert(next_id.clone()) {
                    visits.push(BfsVisit {
                        id: next_id.clone(),
                        depth: dist + 1,
                    });
                    queue.push_back((next_id.clone(), dist + 1));
                }
            }
        }
    }
    visits
}

/// Render the graph as a Mermaid `graph TD` diagram.
pub fn mermaid(graph: &MemoryGraph) -> String {
    let mut out = String::from("graph TD\n");
    for node in &graph.nodes {
        out.push_str(&format!(
            "  {}[\"{} ({})\"]\n",
            mermaid_id(&node.id),
            node.id,
            node.memory_type
        ));
    }
    for edge in &graph.edges {
        match &edge.label {
            Some(label) => out.push_str(&format!(
                "  {} -->|{}| {}\n",
                mermaid_id(&edge.source),
                label,
                mermaid_id(&edge.target)
            )),
            None => out.push_str(&format!(
                "  {} --> {}\n",
                mermaid_id(&edge.source),
                mermaid_id(&edge.target)
            )),
        }
    }
    out
}

/// Mermaid node identifiers cannot contain hyphens in all renderers.
fn mermaid_id(id: &str) -> String {
    id.replace('-', "_")
}

/// Load a scope's graph; a missing file is an empty graph.
pub async fn load(paths: &ScopePaths) -> Result<MemoryGraph> {
    let graph: Option<MemoryGraph> = store::read_json(&paths.graph_path()).await?;
    Ok(graph.unwrap_or_else(MemoryGraph::empty))
}

/// Persist a scope's graph atomically.
///
/// `live_memory_count` is the number of index entries in the scope; writing
/// a node-less graph while memories still exist is rejected as a guard
/// against accidental wipes.
pub async fn save(
    paths: &ScopePaths,
    graph: &MemoryGraph,
    live_memory_count: usize,
) -> Result<()> {
    if graph.nodes.is_empty() && live_memory_count > 0 {
        return Err(Error::Invalid(format!(
            "refusing to write an empty graph while {live_memory_count} memories exist in {} scope",
            paths.kind
        )));
    }
    let mut ordered = graph.clone();
    ordered.version = GRAPH_VERSION;
    store::write_json(&paths.graph_path(), &ordered, paths.kind.is_private()).await?;
    debug!(
        scope = %paths.kind,
        nodes = ordered.nodes.len(),
        edges = ordered.edges.len(),
        "saved graph"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopeKind;
    use tempfile::TempDir;

    fn sample() -> MemoryGraph {
        let g = MemoryGraph::empty();
        let g = add_node(&g, "learning-a", MemoryType::Learning);
        let g = add_node(&g, "learning-b", MemoryType::Learning);
        let g = add_node(&g, "hub-c", MemoryType::Hub);
        let (g, _) = add_edge(&g, "learning-a", "learning-b", None);
        let (g, _) = add_edge(&g, "learning-b", "hub-c", Some("part-of"));
        g
    }

    #[test]
    fn add_node_is_pure_and_idempotent() {
        let g = MemoryGraph::empty();
        let g2 = add_node(&g, "hub-x", MemoryType::Hub);
        assert!(g.nodes.is_empty());
        assert_eq!(g2.nodes.len(), 1);

        let g3 = add_node(&g2, "hub-x", MemoryType::Hub);
        assert_eq!(g3.nodes.len(), 1);
    }

    #[test]
    fn add_node_updates_type_in_place() {
        let g = add_node(&MemoryGraph::empty(), "think-x", MemoryType::Breadcrumb);
        let g = add_node(&g, "think-x", MemoryType::Learning);
        assert_eq!(g.nodes[0].memory_type, MemoryType::Learning);
    }

    #[test]
    fn duplicate_edges_are_ignored() {
        let g = sample();
        let before = g.edges.len();
        let (g2, added) = add_edge(&g, "learning-a", "learning-b", None);
        assert!(!added);
        assert_eq!(g2.edges.len(), before);

        // A different label is a different edge.
        let (g3, added) = add_edge(&g, "learning-a", "learning-b", Some("supersedes"));
        assert!(added);
        assert_eq!(g3.edges.len(), before + 1);
    }

    #[test]
    fn remove_node_cascades_incident_edges() {
        let g = sample();
        let (g2, removed) = remove_node(&g, "learning-b");
        assert_eq!(removed, 2);
        assert!(g2.edges.is_empty());
        assert_eq!(g2.nodes.len(), 2);
    }

    #[test]
    fn remove_edge_without_label_removes_all_between_pair() {
        let g = sample();
        let (g, _) = add_edge(&g, "learning-a", "learning-b", Some("see-also"));
        let (g2, removed) = remove_edge(&g, "learning-a", "learning-b", None);
        assert_eq!(removed, 2);
        assert!(g2.edges.iter().all(|e| e.source != "learning-a"));
    }

    #[test]
    fn remove_edge_with_label_is_exact() {
        let g = sample();
        let (g2, removed) = remove_edge(&g, "learning-b", "hub-c", Some("part-of"));
        assert_eq!(removed, 1);
        let (_, removed_again) = remove_edge(&g2, "learning-b", "hub-c", Some("part-of"));
        assert_eq!(removed_again, 0);
    }

    #[test]
    fn rename_node_rewrites_endpoints() {
        let g = sample();
        let g2 = rename_node(&g, "learning-b", "learning-renamed");
        assert!(g2.has_node("learning-renamed"));
        assert!(!g2.has_node("learning-b"));
        assert!(g2
            .edges
            .iter()
            .any(|e| e.source == "learning-a" && e.target == "learning-renamed"));
        assert!(g2
            .edges
            .iter()
            .any(|e| e.source == "learning-renamed" && e.target == "hub-c"));
    }

    #[test]
    fn neighbours_and_incident() {
        let g = sample();
        assert_eq!(g.neighbours("learning-a"), vec!["learning-b"]);
        assert_eq!(g.incident("learning-b").len(), 2);
        assert_eq!(g.incident("hub-c").len(), 1);
    }

    #[test]
    fn orphans_have_no_edges() {
        let g = sample();
        let g = add_node(&g, "artifact-lonely", MemoryType::Artifact);
        let orphans = g.orphans();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, "artifact-lonely");
    }

    #[test]
    fn bfs_bounded_by_depth() {
        let g = sample();
        let one_hop = bfs(&g, "learning-a", 1, Direction::Outgoing);
        assert_eq!(one_hop.len(), 1);
        assert_eq!(one_hop[0].id, "learning-b");

        let two_hops = bfs(&g, "learning-a", 2, Direction::Outgoing);
        assert_eq!(two_hops.len(), 2);
        assert_eq!(two_hops[1].id, "hub-c");
        assert_eq!(two_hops[1].depth, 2);
    }

    #[test]
    fn bfs_incoming_and_both() {
        let g = sample();
        let incoming = bfs(&g, "hub-c", 2, Direction::Incoming);
        assert_eq!(incoming.len(), 2);

        let both = bfs(&g, "learning-b", 1, Direction::Both);
        let ids: Vec<&str> = both.iter().map(|v| v.id.as_str()).collect();
        assert!(ids.contains(&"learning-a"));
        assert!(ids.contains(&"hub-c"));
    }

    #[test]
    fn mermaid_renders_nodes_and_edges() {
        let g = sample();
        let diagram = mermaid(&g);
        assert!(diagram.starts_with("graph TD\n"));
        assert!(diagram.contains("learning_a[\"learning-a (learning)\"]"));
        assert!(diagram.contains("learning_a --> learning_b"));
        assert!(diagram.contains("learning_b -->|part-of| hub_c"));
    }

    #[tokio::test]
    async fn load_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let paths = ScopePaths {
            kind: ScopeKind::Project,
            root: dir.path().to_path_buf(),
        };
        let g = load(&paths).await.unwrap();
        assert!(g.nodes.is_empty());
    }

    #[tokio::test]
    async fn save_round_trips() {
        let dir = TempDir::new().unwrap();
        let paths = ScopePaths {
            kind: ScopeKind::Project,
            root: dir.path().to_path_buf(),
        };
        let g = sample();
        save(&paths, &g, 3).await.unwrap();
        let loaded = load(&paths).await.unwrap();
        assert_eq!(loaded, g);
    }

    #[tokio::test]
    async fn empty_graph_write_guard() {
        let dir = TempDir::new().unwrap();
        let paths = ScopePaths {
            kind: ScopeKind::Project,
            root: dir.path().to_path_buf(),
        };
        let result = save(&paths, &MemoryGraph::empty(), 5).await;
        assert!(matches!(result, Err(Error::Invalid(_))));

        // With no live memories an empty graph is legitimate.
        save(&paths, &MemoryGraph::empty(), 0).await.unwrap();
    }
}
