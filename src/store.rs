use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::frontmatter;
use crate::memory::Memory;
use crate::scope::ScopePaths;

/// Read and parse a memory file by its scope-relative path.
///
/// Tolerates one concurrent overwrite: a parse failure triggers a single
/// re-read before the error is surfaced.
pub async fn read_memory(paths: &ScopePaths, relative: &str) -> Result<Memory> {
    let full = paths.memory_path(relative);
    let mut attempt = 0;
    loop {
        let content = tokio::fs::read_to_string(&full).await?;
        match frontmatter::parse(&content, relative) {
            Ok((front, body)) => return Ok(Memory { front, body }),
            Err(e) if attempt == 0 => {
                attempt += 1;
                debug!(path = %relative, error = %e, "parse failed, re-reading once");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Serialize and write a memory file atomically at its canonical location.
pub async fn write_memory(paths: &ScopePaths, memory: &Memory) -> Result<()> {
    let relative = memory.relative_path();
    let content = frontmatter::serialize(&memory.front, &memory.body);
    write_atomic(
        &paths.memory_path(&relative),
        content.as_bytes(),
        paths.kind.is_private(),
    )
    .await
}

/// Remove a memory file. A file that is already gone is not an error;
/// reconciliation treats the index as the thing to fix, not the caller.
pub async fn delete_memory(paths: &ScopePaths, relative: &str) -> Result<()> {
    match tokio::fs::remove_file(paths.memory_path(relative)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %relative, "file already absent on delete");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Move a memory file between scope-relative locations (rename, promote,
/// archive).
pub async fn rename_memory(paths: &ScopePaths, from: &str, to: &str) -> Result<()> {
    let target = paths.memory_path(to);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::rename(paths.memory_path(from), target).await?;
    Ok(())
}

/// Load a JSON side file (index, graph, embeddings). Missing file is `None`;
/// a parse failure is retried once to tolerate a concurrent writer.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let name = file_name(path);
    let mut attempt = 0;
    loop {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => return Ok(Some(value)),
            Err(e) if attempt == 0 => {
                attempt += 1;
                debug!(path = %name, error = %e, "json parse failed, re-reading once");
            }
            Err(e) => {
                return Err(Error::Parse {
                    path: name,
                    message: e.to_string(),
                })
            }
        }
    }
}

/// Write a JSON side file atomically.
pub async fn write_json<T: Serialize>(path: &Path, value: &T, private: bool) -> Result<()> {
    let mut content = serde_json::to_vec_pretty(value).map_err(|e| Error::Parse {
        path: file_name(path),
        message: e.to_string(),
    })?;
    content.push(b'\n');
    write_atomic(path, &content, private).await
}

/// Write-to-temp then atomic rename. The temp file is a dot-prefixed
/// sibling so the rename stays on one filesystem; reconciliation scans only
/// consider `*.md`, so an orphaned temp can never corrupt the store.
pub async fn write_atomic(path: &Path, bytes: &[u8], private: bool) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Invalid(format!("path has no parent: {}", file_name(path))))?;
    tokio::fs::create_dir_all(parent).await?;

    let name = file_name(path);
    let tmp = parent.join(format!(".{name}.tmp"));

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    #[cfg(unix)]
    if private {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
    }
    #[cfg(not(unix))]
    let _ = private;

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}
