use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};

/// Comment line written above the local-scope entry in `.gitignore`.
const GITIGNORE_COMMENT: &str = "# engram local memory (not shared)";

/// Relative directory names of the per-project scopes.
pub const PROJECT_DIR: &str = ".engram";
pub const LOCAL_DIR: &str = ".engram-local";

/// The four isolation boundaries, narrowest to broadest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Enterprise,
    Local,
    Project,
    Global,
}

impl ScopeKind {
    /// All scopes in precedence order for cross-scope reads.
    pub const ALL: [ScopeKind; 4] = [
        ScopeKind::Enterprise,
        ScopeKind::Local,
        ScopeKind::Project,
        ScopeKind::Global,
    ];

    /// Local scope files are private to the machine.
    pub fn is_private(self) -> bool {
        matches!(self, ScopeKind::Local)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScopeKind::Enterprise => "enterprise",
            ScopeKind::Local => "local",
            ScopeKind::Project => "project",
            ScopeKind::Global => "global",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "enterprise" => Ok(ScopeKind::Enterprise),
            "local" => Ok(ScopeKind::Local),
            "project" => Ok(ScopeKind::Project),
            "global" => Ok(ScopeKind::Global),
            other => Err(Error::Invalid(format!(
                "unknown scope '{other}': expected enterprise, local, project, or global"
            ))),
        }
    }
}

/// Concrete filesystem layout of one scope.
#[derive(Debug, Clone)]
pub struct ScopePaths {
    pub kind: ScopeKind,
    pub root: PathBuf,
}

impl ScopePaths {
    pub fn permanent_dir(&self) -> PathBuf {
        self.root.join("permanent")
    }

    pub fn temporary_dir(&self) -> PathBuf {
        self.root.join("temporary")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("archive")
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    pub fn graph_path(&self) -> PathBuf {
        self.root.join("graph.json")
    }

    pub fn embeddings_path(&self) -> PathBuf {
        self.root.join("embeddings.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(".lock")
    }

    /// Absolute path of a memory file given its scope-relative path.
    pub fn memory_path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Scope-relative path for a memory in the given subdirectory.
    pub fn relative_path(subdir: &str, id: &str) -> String {
        format!("{subdir}/{id}.md")
    }
}

/// Translates requested scopes into concrete filesystem roots.
#[derive(Debug, Clone)]
pub struct ScopeResolver {
    home_root: PathBuf,
    enterprise_root: Option<PathBuf>,
    project_root: Option<PathBuf>,
}

impl ScopeResolver {
    /// Build a resolver for the given working directory and configuration.
    pub fn new(cwd: &Path, config: &Config) -> Self {
        let project_root = find_project_root(cwd);
        debug!(
            cwd = %cwd.display(),
            project_found = project_root.is_some(),
            "resolved scope anchors"
        );
        Self {
            home_root: config.home_root.clone(),
            enterprise_root: config.enterprise_root.clone(),
            project_root,
        }
    }

    /// Resolve a scope to its filesystem layout, or `None` when unavailable.
    ///
    /// Missing scopes degrade silently to empty results; callers that need a
    /// hard failure use [`ScopeResolver::require`].
    pub fn resolve(&self, kind: ScopeKind) -> Option<ScopePaths> {
        let root = match kind {
            ScopeKind::Enterprise => self.enterprise_root.clone()?,
            ScopeKind::Local => self.project_root.as_ref()?.join(LOCAL_DIR),
            ScopeKind::Project => self.project_root.as_ref()?.join(PROJECT_DIR),
            ScopeKind::Global => self.home_root.clone(),
        };
        Some(ScopePaths { kind, root })
    }

    /// Resolve a scope, surfacing unavailability as an error (write paths).
    pub fn require(&self, kind: ScopeKind) -> Result<ScopePaths> {
        self.resolve(kind).ok_or(Error::Unavailable(kind))
    }

    /// All available scopes in precedence order.
    pub fn available(&self) -> Vec<ScopePaths> {
        ScopeKind::ALL
            .iter()
            .filter_map(|&kind| self.resolve(kind))
            .collect()
    }

    /// Create the scope's directory layout and, for the local scope, make
    /// sure the project's `.gitignore` covers it.
    ///
    /// Callers hold the scope lease when invoking this from a mutation; the
    /// `.gitignore` edit shares that lease.
    pub async fn ensure_layout(&self, paths: &ScopePaths) -> Result<()> {
        tokio::fs::create_dir_all(paths.permanent_dir()).await?;
        tokio::fs::create_dir_all(paths.temporary_dir()).await?;

        if paths.kind == ScopeKind::Local {
            if let Some(project_root) = &self.project_root {
                ensure_gitignored(project_root, LOCAL_DIR).await?;
            }
        }
        Ok(())
    }
}

/// Walk ancestors of `cwd` looking for a project marker (`.git` or
/// `.engram-project`). Returns the marker's directory.
pub fn find_project_root(cwd: &Path) -> Option<PathBuf> {
    let mut dir = Some(cwd);
    while let Some(d) = dir {
        if d.join(".git").exists() || d.join(".engram-project").exists() {
            return Some(d.to_path_buf());
        }
        dir = d.parent();
    }
    None
}

/// Idempotently append `entry` to the project's `.gitignore`, preceded by a
/// blank line and a single comment. Preserves the file's existing line
/// endings and never duplicates the entry.
pub async fn ensure_gitignored(project_root: &Path, entry: &str) -> Result<()> {
    let gitignore = project_root.join(".gitignore");
    let existing = match tokio::fs::read_to_string(&gitignore).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let entry_with_slash = format!("{entry}/");
    let already_listed = existing.lines().any(|line| {
        let trimmed = line.trim();
        trimmed == entry || trimmed == entry_with_slash
    });
    if already_listed {
        return Ok(());
    }

    let eol = if existing.contains("\r\n") { "\r\n" } else { "\n" };
    let mut updated = existing.clone();
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push_str(eol);
    }
    if !updated.is_empty() {
        updated.push_str(eol);
    }
    updated.push_str(GITIGNORE_COMMENT);
    updated.push_str(eol);
    updated.push_str(&entry_with_slash);
    updated.push_str(eol);

    tokio::fs::write(&gitignore, updated).await?;
    info!(entry = %entry_with_slash, "added local scope to .gitignore");
    Ok(())
}
