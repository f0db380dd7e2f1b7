use kbot_core::{ConversationId, SessionKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(with = "session_key_string")]
    pub session_key: SessionKey,
    pub status: ConversationStatus,
    pub turn_count: u64,
    pub created_at: String,
    pub updated_at: String,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// The half-open range of session events a turn's content is reconstructed
/// from. Turns are pointers only; no message content is ever duplicated
/// into `turns.jsonl`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EventRange {
    pub start_seq: u64,
    pub end_seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub seq: u64,
    pub session_id: String,
    pub role: TurnRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub event_range: EventRange,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct AppendTurnInput {
    pub session_id: String,
    pub role: TurnRole,
    pub message_id: Option<String>,
    pub start_seq: u64,
    pub end_seq: u64,
}

#[derive(Debug, Clone)]
pub struct AppendTurnOutcome {
    pub turn: Turn,
    pub was_duplicate: bool,
}
