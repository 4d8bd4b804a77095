pub mod clock;
pub mod config;
pub mod embedding;
pub mod envelope;
pub mod error;
pub mod frontmatter;
pub mod graph;
pub mod index;
pub mod lease;
pub mod logging;
pub mod memory;
pub mod ops;
pub mod scope;
pub mod search;
pub mod store;

pub use error::Error;

// Re-export key public types for convenience.
pub use config::Config;
pub use envelope::Envelope;
pub use frontmatter::Frontmatter;
pub use memory::{Memory, MemoryType, Severity};
pub use scope::{ScopeKind, ScopePaths, ScopeResolver};
pub use search::{SearchMethod, SearchOptions, SearchResponse};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

use std::path::Path;

use embedding::provider::{create_provider, EmbeddingProvider};
use tracing::debug;

/// Primary library handle: a configured store rooted at a working
/// directory, with scope resolution and an optional embedding provider.
pub struct Engram {
    config: Config,
    resolver: ScopeResolver,
    provider: Option<Box<dyn EmbeddingProvider>>,
}

impl Engram {
    /// Open a store for the given working directory, loading configuration
    /// from the environment and the project config file.
    pub fn open(cwd: &Path) -> Result<Self> {
        let config = Config::load(cwd)?;
        Self::open_with_config(cwd, config)
    }

    /// Open with an explicit configuration (tests, embedded callers).
    pub fn open_with_config(cwd: &Path, config: Config) -> Result<Self> {
        let resolver = ScopeResolver::new(cwd, &config);
        let provider = create_provider(&config)?;
        debug!(
            provider = provider.as_ref().map(|p| p.name()).unwrap_or("none"),
            "opened engram store"
        );
        Ok(Self {
            config,
            resolver,
            provider,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn resolver(&self) -> &ScopeResolver {
        &self.resolver
    }

    pub fn provider(&self) -> Option<&dyn EmbeddingProvider> {
        self.provider.as_deref()
    }

    // --- mutation pipeline -------------------------------------------------

    pub async fn write(&self, request: ops::write::WriteRequest) -> Result<ops::write::WriteResult> {
        ops::write::write(&self.resolver, &self.config, self.provider(), request).await
    }

    pub async fn read(&self, id: &str, scope: Option<ScopeKind>) -> Result<ops::write::ReadResult> {
        ops::write::read(&self.resolver, id, scope).await
    }

    pub async fn delete(&self, scope: ScopeKind, id: &str) -> Result<ops::mutate::DeleteResult> {
        ops::mutate::delete(&self.resolver, &self.config, scope, id).await
    }

    pub async fn link(
        &self,
        scope: ScopeKind,
        source: &str,
        target: &str,
        label: Option<&str>,
    ) -> Result<ops::link::LinkResult> {
        ops::link::link(&self.resolver, &self.config, scope, source, target, label).await
    }

    pub async fn unlink(
        &self,
        scope: ScopeKind,
        source: &str,
        target: &str,
        label: Option<&str>,
    ) -> Result<ops::link::UnlinkResult> {
        ops::link::unlink(&self.resolver, &self.config, scope, source, target, label).await
    }

    pub async fn edges(
        &self,
        scope: ScopeKind,
        id: Option<&str>,
    ) -> Result<Vec<graph::GraphEdge>> {
        ops::link::edges(&self.resolver, scope, id).await
    }

    pub async fn graph_document(&self, scope: ScopeKind) -> Result<graph::MemoryGraph> {
        ops::link::graph_document(&self.resolver, scope).await
    }

    pub async fn remove_node(&self, scope: ScopeKind, id: &str) -> Result<usize> {
        ops::link::remove_node(&self.resolver, &self.config, scope, id).await
    }

    pub async fn tag(
        &self,
        scope: ScopeKind,
        id: &str,
        tags: &[String],
    ) -> Result<ops::mutate::TagResult> {
        ops::mutate::tag(&self.resolver, &self.config, scope, id, tags).await
    }

    pub async fn untag(
        &self,
        scope: ScopeKind,
        id: &str,
        tags: &[String],
    ) -> Result<ops::mutate::TagResult> {
        ops::mutate::untag(&self.resolver, &self.config, scope, id, tags).await
    }

    pub async fn rename(
        &self,
        scope: ScopeKind,
        id: &str,
        new_title: &str,
    ) -> Result<ops::mutate::RenameResult> {
        ops::mutate::rename(&self.resolver, &self.config, scope, id, new_title).await
    }

    pub async fn move_memory(
        &self,
        id: &str,
        from: ScopeKind,
        to: ScopeKind,
    ) -> Result<ops::mutate::MoveResult> {
        ops::mutate::move_memory(&self.resolver, &self.config, id, from, to).await
    }

    pub async fn promote(
        &self,
        scope: ScopeKind,
        id: &str,
        new_type: MemoryType,
    ) -> Result<ops::mutate::PromoteResult> {
        ops::mutate::promote(&self.resolver, &self.config, scope, id, new_type).await
    }

    pub async fn archive(
        &self,
        scope: ScopeKind,
        id: &str,
        keep_embedding: bool,
    ) -> Result<ops::mutate::ArchiveResult> {
        ops::mutate::archive(&self.resolver, &self.config, scope, id, keep_embedding).await
    }

    // --- bulk --------------------------------------------------------------

    pub async fn bulk_delete(
        &self,
        scope: ScopeKind,
        ids: &[String],
    ) -> Result<ops::bulk::BulkSummary> {
        ops::bulk::bulk_delete(&self.resolver, &self.config, scope, ids).await
    }

    pub async fn bulk_link(
        &self,
        scope: ScopeKind,
        sources: &[String],
        target: &str,
        label: Option<&str>,
    ) -> Result<ops::bulk::BulkSummary> {
        ops::bulk::bulk_link(&self.resolver, &self.config, scope, sources, target, label).await
    }

    pub async fn bulk_unlink(
        &self,
        scope: ScopeKind,
        sources: &[String],
        target: &str,
    ) -> Result<ops::bulk::BulkSummary> {
        ops::bulk::bulk_unlink(&self.resolver, &self.config, scope, sources, target).await
    }

    pub async fn bulk_tag(
        &self,
        scope: ScopeKind,
        ids: &[String],
        tags: &[String],
    ) -> Result<ops::bulk::BulkSummary> {
        ops::bulk::bulk_tag(&self.resolver, &self.config, scope, ids, tags).await
    }

    pub async fn bulk_promote(
        &self,
        scope: ScopeKind,
        ids: &[String],
        new_type: MemoryType,
    ) -> Result<ops::bulk::BulkSummary> {
        ops::bulk::bulk_promote(&self.resolver, &self.config, scope, ids, new_type).await
    }

    pub async fn bulk_move(
        &self,
        ids: &[String],
        from: ScopeKind,
        to: ScopeKind,
    ) -> Result<ops::bulk::BulkSummary> {
        ops::bulk::bulk_move(&self.resolver, &self.config, ids, from, to).await
    }

    // --- search ------------------------------------------------------------

    pub async fn search(&self, opts: &SearchOptions) -> Result<SearchResponse> {
        search::search(&self.resolver, self.provider(), opts).await
    }

    // --- reconciliation ----------------------------------------------------

    pub async fn sync(&self, scope: ScopeKind) -> Result<ops::reconcile::ReconcileReport> {
        ops::reconcile::sync(&self.resolver, &self.config, scope).await
    }

    pub async fn rebuild(&self, scope: ScopeKind) -> Result<ops::reconcile::ReconcileReport> {
        ops::reconcile::rebuild(&self.resolver, &self.config, scope).await
    }

    pub async fn reindex(&self, scope: ScopeKind) -> Result<ops::reconcile::ReconcileReport> {
        ops::reconcile::reindex(&self.resolver, &self.config, scope).await
    }

    pub async fn refresh(
        &self,
        scope: ScopeKind,
        regenerate_embeddings: bool,
    ) -> Result<ops::reconcile::ReconcileReport> {
        ops::reconcile::refresh(
            &self.resolver,
            &self.config,
            self.provider(),
            scope,
            regenerate_embeddings,
        )
        .await
    }

    pub async fn prune(
        &self,
        scope: ScopeKind,
        max_age_days: Option<i64>,
    ) -> Result<ops::reconcile::PruneReport> {
        ops::reconcile::prune(&self.resolver, &self.config, scope, max_age_days).await
    }

    pub async fn repair(&self, scope: ScopeKind) -> Result<ops::reconcile::RepairReport> {
        ops::reconcile::repair(&self.resolver, &self.config, scope).await
    }

    pub async fn validate(&self, scope: ScopeKind) -> Result<Vec<ops::reconcile::Violation>> {
        ops::reconcile::validate(&self.resolver, scope).await
    }

    // --- queries -----------------------------------------------------------

    pub async fn list(
        &self,
        scopes: &[ScopeKind],
        memory_type: Option<MemoryType>,
        tag: Option<&str>,
    ) -> Result<Vec<index::IndexEntry>> {
        ops::query::list(&self.resolver, scopes, memory_type, tag).await
    }

    pub async fn query(&self, filter: &ops::query::QueryFilter) -> Result<Vec<ops::query::QueryHit>> {
        ops::query::query(&self.resolver, filter).await
    }

    pub async fn stats(&self, scopes: &[ScopeKind]) -> Result<ops::query::StatsReport> {
        ops::query::stats(&self.resolver, scopes).await
    }

    pub async fn status(&self) -> Result<Vec<ops::query::ScopeStatus>> {
        ops::query::status(&self.resolver).await
    }

    pub async fn impact(
        &self,
        scope: ScopeKind,
        id: &str,
        depth: usize,
    ) -> Result<ops::query::ImpactReport> {
        ops::query::impact(&self.resolver, scope, id, depth).await
    }

    pub async fn suggest_links(
        &self,
        scope: ScopeKind,
        id: &str,
        limit: usize,
    ) -> Result<Vec<ops::query::SuggestedLink>> {
        ops::query::suggest_links(
            &self.resolver,
            &self.config,
            self.provider(),
            scope,
            id,
            limit,
        )
        .await
    }

    pub async fn summarize(
        &self,
        scope: Option<ScopeKind>,
    ) -> Result<Vec<ops::query::ScopeSummary>> {
        ops::query::summarize(&self.resolver, scope).await
    }

    pub async fn export(&self, scopes: &[ScopeKind]) -> Result<ops::query::ExportDocument> {
        ops::query::export(&self.resolver, scopes).await
    }

    pub async fn import(
        &self,
        document: ops::query::ImportDocument,
        scope_override: Option<ScopeKind>,
    ) -> Result<ops::query::ImportSummary> {
        ops::query::import(&self.resolver, &self.config, document, scope_override).await
    }
}
