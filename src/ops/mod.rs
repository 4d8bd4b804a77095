//! The mutation pipeline and its read-side companions.
//!
//! Every mutation follows the same shape: resolve the scope, acquire the
//! per-scope write lease, load index and graph, apply pure updates, then
//! persist file(s) → index → graph in that order. Failures after the file
//! step roll back best-effort; `sync` reconciles anything left behind.

pub mod bulk;
pub mod link;
pub mod mutate;
pub mod query;
pub mod reconcile;
pub mod write;

use crate::error::Result;
use crate::graph::{self, MemoryGraph};
use crate::index::{self, MemoryIndex};
use crate::scope::ScopePaths;

/// Index and graph of one scope, loaded together under the lease.
pub(crate) struct ScopeState {
    pub index: MemoryIndex,
    pub graph: MemoryGraph,
}

pub(crate) async fn load_state(paths: &ScopePaths) -> Result<ScopeState> {
    Ok(ScopeState {
        index: index::load(paths).await?,
        graph: graph::load(paths).await?,
    })
}

/// Persist index then graph for a scope.
pub(crate) async fn save_state(paths: &ScopePaths, state: &ScopeState) -> Result<()> {
    index::save(paths, &state.index).await?;
    graph::save(paths, &state.graph, state.index.len()).await?;
    Ok(())
}
