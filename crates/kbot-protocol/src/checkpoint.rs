//! Checkpoint file: written by the child before a planned restart, or
//! synthesized by the supervisor on crash. Persisted with the same
//! unlocked, single-writer JSON idiom as `skynet_core::update::UpdateCheckState`
//! — a checkpoint has exactly one writer at a time (the child, or the
//! supervisor immediately after a crash) so no file lock is needed.

use serde::{Deserialize, Serialize};

pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RestartReason {
    Planned,
    Upgrade,
    Crash,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WakeContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_work: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub session_id: String,
    pub restart_reason: RestartReason,
    #[serde(default)]
    pub wake_context: WakeContext,
    pub created_at: String,
}

impl Checkpoint {
    pub fn new(session_id: impl Into<String>, restart_reason: RestartReason) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            session_id: session_id.into(),
            restart_reason,
            wake_context: WakeContext::default(),
            created_at: kbot_core::time::now_rfc3339(),
        }
    }

    /// Synthesize the minimal crash checkpoint the supervisor writes when
    /// the child dies without having requested a planned restart.
    pub fn synthesize_crash() -> Self {
        Self::new(kbot_core::SessionId::new().to_string(), RestartReason::Crash)
    }

    pub fn load(path: &std::path::Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn save(&self, path: &std::path::Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}
