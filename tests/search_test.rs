use std::path::Path;

use engram::config::EmbeddingProviderType;
use engram::ops::write::WriteRequest;
use engram::{Config, Engram, MemoryType, ScopeKind, SearchMethod, SearchOptions};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn test_config(home: &Path, provider: Option<EmbeddingProviderType>) -> Config {
    Config {
        home_root: home.to_path_buf(),
        enterprise_root: None,
        embedding_provider: provider,
        embedding_model: "test-model".into(),
        embedding_dimensions: 8,
        openai_api_key: None,
        ollama_host: "http://localhost:11434".into(),
        embedding_endpoint: None,
        search_limit: 10,
        search_threshold: 0.45,
        inject_threshold: 0.4,
        prune_max_age_days: 7,
        lease_timeout_ms: 5000,
        provider_timeout_ms: 30_000,
        probe_timeout_ms: 2000,
    }
}

struct TestStore {
    _home: TempDir,
    _project: TempDir,
    store: Engram,
}

fn open_store(provider: Option<EmbeddingProviderType>) -> TestStore {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    std::fs::create_dir_all(project.path().join(".git")).unwrap();
    let store =
        Engram::open_with_config(project.path(), test_config(home.path(), provider)).unwrap();
    TestStore {
        _home: home,
        _project: project,
        store,
    }
}

async fn seed(store: &Engram) {
    for (memory_type, title, tags, body) in [
        (
            MemoryType::Learning,
            "Scope isolation in the store",
            vec!["scopes"],
            "Each scope keeps its own index and graph. Scope isolation is absolute.",
        ),
        (
            MemoryType::Gotcha,
            "Lease timeout under contention",
            vec!["locking"],
            "Writers block on the scope lease. A timeout surfaces as a conflict.",
        ),
        (
            MemoryType::Decision,
            "Use JSON side files",
            vec!["format"],
            "Index and graph are JSON documents derived from markdown files.",
        ),
    ] {
        store
            .write(WriteRequest {
                scope: ScopeKind::Project,
                memory_type,
                title: Some(title.to_string()),
                body: body.to_string(),
                tags: tags.into_iter().map(str::to_string).collect(),
                links: Vec::new(),
                severity: None,
                project: None,
            })
            .await
            .unwrap();
    }
}

fn opts(query: &str) -> SearchOptions {
    SearchOptions {
        query: query.to_string(),
        scopes: Vec::new(),
        limit: 10,
        semantic: None,
        threshold: 0.45,
    }
}

// ---------------------------------------------------------------------------
// Keyword search
// ---------------------------------------------------------------------------

#[tokio::test]
async fn keyword_search_matches_title_and_body() {
    let t = open_store(None);
    seed(&t.store).await;

    let response = t.store.search(&opts("scope isolation")).await.unwrap();
    assert_eq!(response.method, SearchMethod::Keyword);
    assert!(!response.hits.is_empty());
    assert_eq!(response.hits[0].id, "learning-scope-isolation-in-the-store");
}

#[tokio::test]
async fn keyword_search_ranks_title_matches_higher() {
    let t = open_store(None);
    seed(&t.store).await;

    let response = t.store.search(&opts("lease timeout")).await.unwrap();
    assert_eq!(response.hits[0].id, "gotcha-lease-timeout-under-contention");
}

#[tokio::test]
async fn stop_words_and_empty_queries_yield_nothing() {
    let t = open_store(None);
    seed(&t.store).await;

    let response = t.store.search(&opts("the and of")).await.unwrap();
    assert!(response.hits.is_empty());

    let response = t.store.search(&opts("   ")).await.unwrap();
    assert!(response.hits.is_empty());
}

#[tokio::test]
async fn search_missing_scopes_degrade_to_empty() {
    let t = open_store(None);
    seed(&t.store).await;

    let response = t
        .store
        .search(&SearchOptions {
            scopes: vec![ScopeKind::Enterprise],
            ..opts("scope isolation")
        })
        .await
        .unwrap();
    assert!(response.hits.is_empty());
}

// ---------------------------------------------------------------------------
// Semantic search and degradation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn forced_semantic_without_provider_falls_back_to_keyword() {
    let t = open_store(None);
    seed(&t.store).await;

    let response = t
        .store
        .search(&SearchOptions {
            semantic: Some(true),
            ..opts("scope isolation")
        })
        .await
        .unwrap();
    assert_eq!(response.method, SearchMethod::Keyword);
    assert!(!response.hits.is_empty());
}

#[tokio::test]
async fn semantic_search_uses_cached_vectors() {
    let t = open_store(Some(EmbeddingProviderType::Mock));
    seed(&t.store).await;
    // Populate the cache.
    t.store.refresh(ScopeKind::Project, true).await.unwrap();

    let response = t
        .store
        .search(&SearchOptions {
            semantic: Some(true),
            // The mock provider's hash-derived vectors score high for
            // everything; the point is the method, not the ranking.
            threshold: 0.0,
            ..opts("Scope isolation in the store")
        })
        .await
        .unwrap();
    assert_eq!(response.method, SearchMethod::Semantic);
    assert_eq!(response.hits.len(), 3);
}

#[tokio::test]
async fn semantic_search_excludes_breadcrumbs() {
    let t = open_store(Some(EmbeddingProviderType::Mock));
    seed(&t.store).await;
    t.store
        .write(WriteRequest {
            scope: ScopeKind::Project,
            memory_type: MemoryType::Breadcrumb,
            title: Some("Scope isolation thought".into()),
            body: "thinking about scope isolation".into(),
            tags: Vec::new(),
            links: Vec::new(),
            severity: None,
            project: None,
        })
        .await
        .unwrap();
    t.store.refresh(ScopeKind::Project, true).await.unwrap();

    let response = t
        .store
        .search(&SearchOptions {
            semantic: Some(true),
            threshold: 0.0,
            ..opts("scope isolation")
        })
        .await
        .unwrap();
    assert_eq!(response.method, SearchMethod::Semantic);
    assert!(response
        .hits
        .iter()
        .all(|h| h.memory_type != MemoryType::Breadcrumb));
}

#[tokio::test]
async fn keyword_search_includes_breadcrumbs() {
    let t = open_store(None);
    t.store
        .write(WriteRequest {
            scope: ScopeKind::Project,
            memory_type: MemoryType::Breadcrumb,
            title: Some("Deliberating about sharding".into()),
            body: "sharding thoughts".into(),
            tags: Vec::new(),
            links: Vec::new(),
            severity: None,
            project: None,
        })
        .await
        .unwrap();

    let response = t.store.search(&opts("sharding")).await.unwrap();
    assert_eq!(response.hits.len(), 1);
}

#[tokio::test]
async fn search_limit_is_respected() {
    let t = open_store(None);
    for i in 0..15 {
        t.store
            .write(WriteRequest {
                scope: ScopeKind::Project,
                memory_type: MemoryType::Learning,
                title: Some(format!("Sharding note {i}")),
                body: "sharding".into(),
                tags: Vec::new(),
                links: Vec::new(),
                severity: None,
                project: None,
            })
            .await
            .unwrap();
    }

    let response = t
        .store
        .search(&SearchOptions {
            limit: 5,
            ..opts("sharding")
        })
        .await
        .unwrap();
    assert_eq!(response.hits.len(), 5);
}

#[tokio::test]
async fn cross_scope_hits_are_merged() {
    let t = open_store(None);
    for scope in [ScopeKind::Project, ScopeKind::Global] {
        t.store
            .write(WriteRequest {
                scope,
                memory_type: MemoryType::Learning,
                title: Some("Sharding everywhere".into()),
                body: "sharding".into(),
                tags: Vec::new(),
                links: Vec::new(),
                severity: None,
                project: None,
            })
            .await
            .unwrap();
    }

    let response = t.store.search(&opts("sharding")).await.unwrap();
    assert_eq!(response.hits.len(), 2, "same id in two scopes is two hits");
}

// ---------------------------------------------------------------------------
// Suggest-links
// ---------------------------------------------------------------------------

#[tokio::test]
async fn suggest_links_excludes_self_and_linked() {
    let t = open_store(None);
    seed(&t.store).await;
    let source = "learning-scope-isolation-in-the-store";
    // "Use JSON side files" mentions index/graph/scope-free wording; link
    // the gotcha so it must be excluded.
    t.store
        .link(
            ScopeKind::Project,
            source,
            "gotcha-lease-timeout-under-contention",
            None,
        )
        .await
        .unwrap();

    let suggestions = t
        .store
        .suggest_links(ScopeKind::Project, source, 5)
        .await
        .unwrap();
    assert!(suggestions.iter().all(|s| s.id != source));
    assert!(suggestions
        .iter()
        .all(|s| s.id != "gotcha-lease-timeout-under-contention"));
}

#[tokio::test]
async fn suggest_links_for_missing_id_is_not_found() {
    let t = open_store(None);
    seed(&t.store).await;
    let err = t
        .store
        .suggest_links(ScopeKind::Project, "learning-ghost", 5)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}
