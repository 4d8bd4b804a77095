use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::memory::MemoryType;
use crate::scope::{ScopeKind, ScopePaths};
use crate::store;

/// Current index document version.
pub const INDEX_VERSION: u32 = 1;

/// One memory's row in the per-scope index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub id: String,
    pub relative_path: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub tags: Vec<String>,
    #[serde(with = "crate::clock::serde_millis")]
    pub created: DateTime<Utc>,
    #[serde(with = "crate::clock::serde_millis")]
    pub updated: DateTime<Utc>,
    pub scope: ScopeKind,
}

/// The per-scope `index.json` document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryIndex {
    pub version: u32,
    pub memories: Vec<IndexEntry>,
}

impl MemoryIndex {
    pub fn empty() -> Self {
        Self {
            version: INDEX_VERSION,
            memories: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.memories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&IndexEntry> {
        self.memories.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    pub fn ids(&self) -> std::collections::HashSet<String> {
        self.memories.iter().map(|e| e.id.clone()).collect()
    }

    pub fn list_by_type(&self, memory_type: MemoryType) -> Vec<&IndexEntry> {
        self.memories
            .iter()
            .filter(|e| e.memory_type == memory_type)
            .collect()
    }

    pub fn by_tag(&self, tag: &str) -> Vec<&IndexEntry> {
        self.memories
            .iter()
            .filter(|e| e.tags.iter().any(|t| t == tag))
            .collect()
    }
}

/// Wire shape on load: legacy entries carry an absolute `file` path instead
/// of `relativePath`.
#[derive(Deserialize)]
struct RawIndex {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    memories: Vec<RawEntry>,
}

fn default_version() -> u32 {
    INDEX_VERSION
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEntry {
    id: String,
    #[serde(default)]
    relative_path: Option<String>,
    /// Legacy absolute path key.
    #[serde(default)]
    file: Option<String>,
    #[serde(rename = "type")]
    memory_type: MemoryType,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(with = "crate::clock::serde_millis")]
    created: DateTime<Utc>,
    #[serde(with = "crate::clock::serde_millis")]
    updated: DateTime<Utc>,
    scope: ScopeKind,
}

/// Load a scope's index, migrating legacy `file` entries to `relativePath`.
/// Returns the index and the number of migrated entries; a missing file is
/// an empty index.
pub async fn load_with_migrations(paths: &ScopePaths) -> Result<(MemoryIndex, usize)> {
    let raw: Option<RawIndex> = store::read_json(&paths.index_path()).await?;
    let Some(raw) = raw else {
        return Ok((MemoryIndex::empty(), 0));
    };

    let mut migrated = 0;
    let memories = raw
        .memories
        .into_iter()
        .map(|entry| {
            let relative_path = match entry.relative_path {
                Some(rel) => rel,
                None => {
                    migrated += 1;
                    migrate_legacy_path(paths, entry.file.as_deref())
                        .unwrap_or_else(|| {
                            ScopePaths::relative_path(entry.memory_type.subdirectory(), &entry.id)
                        })
                }
            };
            IndexEntry {
                id: entry.id,
                relative_path,
                memory_type: entry.memory_type,
                tags: entry.tags,
                created: entry.created,
                updated: entry.updated,
                scope: entry.scope,
            }
        })
        .collect();

    if migrated > 0 {
        info!(scope = %paths.kind, migrated, "migrated legacy index entries");
    }

    Ok((
        MemoryIndex {
            version: raw.version,
            memories,
        },
        migrated,
    ))
}

/// Load a scope's index (migrations applied silently).
pub async fn load(paths: &ScopePaths) -> Result<MemoryIndex> {
    let (index, _) = load_with_migrations(paths).await?;
    Ok(index)
}

/// Recompute a scope-relative path from a legacy absolute one. `None` when
/// the legacy path does not sit under the scope root.
fn migrate_legacy_path(paths: &ScopePaths, file: Option<&str>) -> Option<String> {
    let file = file?;
    let rel = std::path::Path::new(file).strip_prefix(&paths.root).ok()?;
    Some(rel.to_string_lossy().replace('\\', "/"))
}

/// Persist a scope's index atomically, ordered by `updated` descending for
/// fast recency queries (ties break on id for determinism).
pub async fn save(paths: &ScopePaths, index: &MemoryIndex) -> Result<()> {
    let mut ordered = index.clone();
    ordered.version = INDEX_VERSION;
    ordered
        .memories
        .sort_by(|a, b| b.updated.cmp(&a.updated).then_with(|| a.id.cmp(&b.id)));
    store::write_json(&paths.index_path(), &ordered, paths.kind.is_private()).await?;
    debug!(scope = %paths.kind, entries = ordered.memories.len(), "saved index");
    Ok(())
}

/// Insert or replace an entry by id, returning the new index.
pub fn upsert(index: &MemoryIndex, entry: IndexEntry) -> MemoryIndex {
    let mut memories: Vec<IndexEntry> = index
        .memories
        .iter()
        .filter(|e| e.id != entry.id)
        .cloned()
        .collect();
    memories.push(entry);
    MemoryIndex {
        version: index.version,
        memories,
    }
}

/// Remove an entry by id, returning the new index.
pub fn remove(index: &MemoryIndex, id: &str) -> MemoryIndex {
    MemoryIndex {
        version: index.version,
        memories: index
            .memories
            .iter()
            .filter(|e| e.id != id)
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;
    use tempfile::TempDir;

    fn paths(dir: &TempDir) -> ScopePaths {
        ScopePaths {
            kind: ScopeKind::Project,
            root: dir.path().to_path_buf(),
        }
    }

    fn entry(id: &str, updated: &str) -> IndexEntry {
        IndexEntry {
            id: id.into(),
            relative_path: format!("permanent/{id}.md"),
            memory_type: MemoryType::Learning,
            tags: vec!["t".into()],
            created: clock::parse_timestamp("2026-01-01T00:00:00.000Z").unwrap(),
            updated: clock::parse_timestamp(updated).unwrap(),
            scope: ScopeKind::Project,
        }
    }

    #[tokio::test]
    async fn missing_index_loads_empty() {
        let dir = TempDir::new().unwrap();
        let index = load(&paths(&dir)).await.unwrap();
        assert!(index.is_empty());
        assert_eq!(index.version, INDEX_VERSION);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let p = paths(&dir);
        let index = MemoryIndex {
            version: INDEX_VERSION,
            memories: vec![entry("learning-a", "2026-01-02T00:00:00.000Z")],
        };
        save(&p, &index).await.unwrap();
        let loaded = load(&p).await.unwrap();
        assert_eq!(loaded, index);
    }

    #[tokio::test]
    async fn save_orders_by_updated_descending() {
        let dir = TempDir::new().unwrap();
        let p = paths(&dir);
        let index = MemoryIndex {
            version: INDEX_VERSION,
            memories: vec![
                entry("learning-old", "2026-01-01T00:00:00.000Z"),
                entry("learning-new", "2026-01-03T00:00:00.000Z"),
                entry("learning-mid", "2026-01-02T00:00:00.000Z"),
            ],
        };
        save(&p, &index).await.unwrap();
        let loaded = load(&p).await.unwrap();
        let ids: Vec<&str> = loaded.memories.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["learning-new", "learning-mid", "learning-old"]);
    }

    #[tokio::test]
    async fn legacy_file_entries_are_migrated() {
        let dir = TempDir::new().unwrap();
        let p = paths(&dir);
        let legacy = serde_json::json!({
            "version": 1,
            "memories": [{
                "id": "learning-x",
                "file": dir.path().join("permanent").join("learning-x.md"),
                "type": "learning",
                "tags": [],
                "created": "2026-01-01T00:00:00.000Z",
                "updated": "2026-01-01T00:00:00.000Z",
                "scope": "project"
            }]
        });
        std::fs::write(
            p.index_path(),
            serde_json::to_string_pretty(&legacy).unwrap(),
        )
        .unwrap();

        let (index, migrated) = load_with_migrations(&p).await.unwrap();
        assert_eq!(migrated, 1);
        assert_eq!(index.memories[0].relative_path, "permanent/learning-x.md");

        // After the next save the on-disk document carries relativePath, not file.
        save(&p, &index).await.unwrap();
        let on_disk = std::fs::read_to_string(p.index_path()).unwrap();
        assert!(on_disk.contains("relativePath"));
        assert!(!on_disk.contains("\"file\""));
    }

    #[tokio::test]
    async fn unusable_legacy_path_falls_back_to_type_dir() {
        let dir = TempDir::new().unwrap();
        let p = paths(&dir);
        let legacy = serde_json::json!({
            "version": 1,
            "memories": [{
                "id": "gotcha-y",
                "file": "/somewhere/else/gotcha-y.md",
                "type": "gotcha",
                "tags": [],
                "created": "2026-01-01T00:00:00.000Z",
                "updated": "2026-01-01T00:00:00.000Z",
                "scope": "project"
            }]
        });
        std::fs::write(
            p.index_path(),
            serde_json::to_string_pretty(&legacy).unwrap(),
        )
        .unwrap();

        let (index, migrated) = load_with_migrations(&p).await.unwrap();
        assert_eq!(migrated, 1);
        assert_eq!(index.memories[0].relative_path, "permanent/gotcha-y.md");
    }

    #[test]
    fn upsert_is_pure_and_replaces() {
        let index = MemoryIndex {
            version: INDEX_VERSION,
            memories: vec![entry("learning-a", "2026-01-01T00:00:00.000Z")],
        };
        let mut updated_entry = entry("learning-a", "2026-01-05T00:00:00.000Z");
        updated_entry.tags = vec!["fresh".into()];

        let next = upsert(&index, updated_entry.clone());
        assert_eq!(index.memories[0].tags, vec!["t"]);
        assert_eq!(next.memories.len(), 1);
        assert_eq!(next.memories[0], updated_entry);
    }

    #[test]
    fn remove_is_pure() {
        let index = MemoryIndex {
            version: INDEX_VERSION,
            memories: vec![
                entry("learning-a", "2026-01-01T00:00:00.000Z"),
                entry("learning-b", "2026-01-01T00:00:00.000Z"),
            ],
        };
        let next = remove(&index, "learning-a");
        assert_eq!(index.len(), 2);
        assert_eq!(next.len(), 1);
        assert_eq!(next.memories[0].id, "learning-b");
    }

    #[test]
    fn lookups() {
        let index = MemoryIndex {
            version: INDEX_VERSION,
            memories: vec![
                entry("learning-a", "2026-01-01T00:00:00.000Z"),
                entry("learning-b", "2026-01-01T00:00:00.000Z"),
            ],
        };
        assert!(index.contains("learning-a"));
        assert_eq!(index.list_by_type(MemoryType::Learning).len(), 2);
        assert_eq!(index.list_by_type(MemoryType::Hub).len(), 0);
        assert_eq!(index.by_tag("t").len(), 2);
        assert_eq!(index.by_tag("absent").len(), 0);
    }
}
