use kbot_core::{ConversationId, SessionId, SessionKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Abandoned)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    pub id: SessionId,
    pub agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(with = "session_key_string")]
    pub session_key: SessionKey,
    pub status: SessionStatus,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
}

mod session_key_string {
    use kbot_core::SessionKey;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &SessionKey, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&key.format())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SessionKey, D::Error> {
        let raw = String::deserialize(d)?;
        SessionKey::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone)]
pub struct CreateSessionInput {
    pub id: Option<SessionId>,
    pub agent: String,
    pub conversation_id: Option<ConversationId>,
    pub session_key: SessionKey,
}

#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    pub agent: Option<String>,
}

impl SessionFilter {
    pub fn matches(&self, session: &AgentSession) -> bool {
        if let Some(status) = self.status {
            if session.status != status {
                return false;
            }
        }
        if let Some(agent) = &self.agent {
            if &session.agent != agent {
                return false;
            }
        }
        true
    }
}

/// One line of `events.jsonl`. `seq` is dense and zero-based per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub ts: i64,
    pub seq: u64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct AppendEventInput {
    pub event_type: String,
    pub trace_id: Option<String>,
    pub data: serde_json::Value,
    /// Normally left `None` so the store stamps `ts = now()`; tests may
    /// override it.
    pub ts: Option<i64>,
}

pub const SESSION_EVENT_TYPES: &[&str] = &[
    "prompt.sent",
    "message.chunk",
    "session.update",
    "tool.call",
    "tool.result",
    "session.start",
    "session.end",
];
