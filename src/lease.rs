use std::path::PathBuf;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::scope::ScopePaths;

/// Poll interval while waiting for a contended lease.
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// An advisory per-scope write lease, backed by an OS-native exclusive lock
/// on the scope's `.lock` file.
///
/// Mutations hold the lease for the duration of load → mutate → save.
/// Readers do not take it. The lock is released on drop.
pub struct ScopeLease {
    file: std::fs::File,
    path: PathBuf,
}

impl ScopeLease {
    /// Acquire the lease, retrying until `timeout_ms` elapses. A timeout is
    /// a recoverable [`Error::Conflict`]; callers may retry.
    pub async fn acquire(paths: &ScopePaths, timeout_ms: u64) -> Result<Self> {
        std::fs::create_dir_all(&paths.root)?;
        let path = paths.lock_path();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    trace!(scope = %paths.kind, "acquired scope lease");
                    return Ok(Self { file, path });
                }
                Err(_) if Instant::now() < deadline => {
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
                Err(_) => {
                    debug!(scope = %paths.kind, timeout_ms, "lease acquisition timed out");
                    return Err(Error::Conflict(format!(
                        "could not acquire {} scope lease within {timeout_ms}ms",
                        paths.kind
                    )));
                }
            }
        }
    }
}

impl Drop for ScopeLease {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            trace!(path = %self.path.display(), error = %e, "lease unlock failed");
        }
    }
}
