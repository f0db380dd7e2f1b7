//! Create-exclusive file locking shared by the session and conversation
//! stores. Unlike `flock`-based advisory locks (see the `agentty` lock
//! idiom this codebase also knows), a crashed holder leaves a stale lock
//! file behind — this implementation only ever needs to protect a single
//! in-process append, so the caller is expected to hold the lock for a
//! short bounded duration and nothing relies on crash auto-release.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CoreError, Result};

const RETRY_SLEEP_MS: u64 = 25;

/// A held `.lock` file. Released (best-effort unlink) on drop.
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Acquire `path` via create-exclusive semantics, retrying with a short
    /// cooperative sleep until `timeout` elapses.
    pub async fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let deadline = tokio::time::Instant::now() + timeout;
        let pid = std::process::id().to_string();

        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
            {
                Ok(mut f) => {
                    use std::io::Write;
                    let _ = f.write_all(pid.as_bytes());
                    return Ok(FileLock {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(CoreError::LockFailed {
                            path: path.display().to_string(),
                            reason: format!("timed out after {}ms", timeout.as_millis()),
                        });
                    }
                    tokio::time::sleep(Duration::from_millis(RETRY_SLEEP_MS)).await;
                }
                Err(e) => {
                    return Err(CoreError::LockFailed {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Best-effort: tolerate the file already being gone.
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_then_drop_allows_reacquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");
        {
            let _lock = FileLock::acquire(&path, Duration::from_millis(100)).await.unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
        let _lock2 = FileLock::acquire(&path, Duration::from_millis(100)).await.unwrap();
    }

    #[tokio::test]
    async fn contended_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");
        let _held = FileLock::acquire(&path, Duration::from_millis(100)).await.unwrap();
        let result = FileLock::acquire(&path, Duration::from_millis(60)).await;
        assert!(result.is_err());
    }
}
