use serde::{Deserialize, Serialize};

pub const DEFAULT_BACKOFF_MIN_MS: u64 = 500;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub command: String,
    pub args: Vec<String>,
    pub base_dir: std::path::PathBuf,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
    pub shutdown_timeout_secs: u64,
    pub status_path: std::path::PathBuf,
}

/// Mirrors `UpdateCheckState`'s plain-JSON sidecar idiom: single writer,
/// no file lock required.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunStatus {
    pub pid: Option<u32>,
    pub consecutive_failures: u32,
    pub last_exit_code: Option<i32>,
    pub last_spawn_at: Option<String>,
}

impl RunStatus {
    pub async fn load(path: &std::path::Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub async fn save(&self, path: &std::path::Path) -> crate::error::Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, raw).await?;
        Ok(())
    }
}
