use std::collections::HashMap;

pub const DEFAULT_ROTATION_THRESHOLD_PCT: f64 = 70.0;
pub const DEFAULT_RECENT_CONVERSATION_WINDOW_SECS: i64 = 1800;
pub const DEFAULT_USAGE_DEBOUNCE_MS: u64 = 2_000;
pub const DEFAULT_USAGE_PROBE_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy)]
pub struct LifecycleConfig {
    pub rotation_threshold_pct: f64,
    pub recent_conversation_window_secs: i64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            rotation_threshold_pct: DEFAULT_ROTATION_THRESHOLD_PCT,
            recent_conversation_window_secs: DEFAULT_RECENT_CONVERSATION_WINDOW_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LiveSession {
    pub acp_session_id: String,
    pub session_id: Option<String>,
    pub conversation_id: Option<String>,
    pub usage_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GetOrCreateOutcome {
    pub is_new: bool,
    pub was_rotated: bool,
    pub was_recovered: bool,
}

#[derive(Debug, Clone)]
pub struct GetOrCreateResult {
    pub acp_session_id: String,
    pub outcome: GetOrCreateOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UsageSnapshot {
    pub current: u64,
    pub max: u64,
    pub percentage: f64,
    pub model: Option<String>,
    pub categories: HashMap<String, u64>,
}
