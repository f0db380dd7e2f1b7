use crate::types::UsageSnapshot;

#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    SessionCreated { session_key: String, acp_session_id: String },
    SessionRecovered { session_key: String, acp_session_id: String },
    SessionRotated { session_key: String, old_acp_session_id: String, new_acp_session_id: String },
    SessionEnded { session_key: String },
}

#[derive(Debug, Clone)]
pub enum UsageEvent {
    Update { session_key: String, snapshot: UsageSnapshot },
    Error { session_key: String, message: String },
    Timeout { session_key: String, ms: u64 },
}
