use std::path::PathBuf;
use std::time::Duration;

use kbot_core::lock::FileLock;
use kbot_core::time::now_rfc3339;
use kbot_core::{ConversationId, CoreError, SessionKey};
use kbot_sessions::SessionStore;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tracing::instrument;

use crate::error::{ConversationStoreError, Result};
use crate::events::ConversationStoreEvent;
use crate::index::{load_map, load_seq_map, save_map, save_seq_map};
use crate::types::{AppendTurnInput, AppendTurnOutcome, Conversation, ConversationStatus, EventRange, Turn};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ConversationStore {
    base_dir: PathBuf,
    lock_timeout: Duration,
    events_tx: broadcast::Sender<ConversationStoreEvent>,
    sessions: Option<std::sync::Arc<SessionStore>>,
}

impl ConversationStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self::with_sessions(base_dir, None)
    }

    pub fn with_sessions(base_dir: impl Into<PathBuf>, sessions: Option<std::sync::Arc<SessionStore>>) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            base_dir: base_dir.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            events_tx,
            sessions,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationStoreEvent> {
        self.events_tx.subscribe()
    }

    fn conversations_root(&self) -> PathBuf {
        self.base_dir.join("conversations")
    }

    fn conversation_dir(&self, id: &str) -> PathBuf {
        self.conversations_root().join(id)
    }

    fn yaml_path(&self, id: &str) -> PathBuf {
        self.conversation_dir(id).join("conversation.yaml")
    }

    fn turns_path(&self, id: &str) -> PathBuf {
        self.conversation_dir(id).join("turns.jsonl")
    }

    fn lock_path(&self, id: &str) -> PathBuf {
        self.conversation_dir(id).join(".lock")
    }

    fn message_id_index_path(&self, id: &str) -> PathBuf {
        self.conversation_dir(id).join("message-id-index.json")
    }

    fn session_key_index_path(&self) -> PathBuf {
        self.conversations_root().join("session-key-index.json")
    }

    fn session_key_index_lock_path(&self) -> PathBuf {
        self.conversations_root().join(".session-key-index.lock")
    }

    #[instrument(skip(self, session_key), fields(session_key = %session_key))]
    pub async fn create_conversation(&self, session_key: SessionKey) -> Result<Conversation> {
        let id = ConversationId::new();
        let now = now_rfc3339();
        let conversation = Conversation {
            id,
            session_key: session_key.clone(),
            status: ConversationStatus::Active,
            turn_count: 0,
            created_at: now.clone(),
            updated_at: now,
        };

        tokio::fs::create_dir_all(self.conversations_root()).await?;
        tokio::fs::create_dir_all(self.conversation_dir(conversation.id.as_str())).await?;
        write_yaml(&self.yaml_path(conversation.id.as_str()), &conversation).await?;
        tokio::fs::write(self.turns_path(conversation.id.as_str()), b"").await?;

        {
            let _lock = FileLock::acquire(&self.session_key_index_lock_path(), self.lock_timeout).await?;
            let mut index = load_map(&self.session_key_index_path()).await?;
            index.insert(session_key.format(), conversation.id.as_str().to_string());
            save_map(&self.session_key_index_path(), &index).await?;
        }

        let _ = self
            .events_tx
            .send(ConversationStoreEvent::ConversationCreated(conversation.clone()));
        Ok(conversation)
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let path = self.yaml_path(id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(read_yaml(&path).await?))
    }

    pub async fn get_conversation_by_session_key(&self, session_key: &SessionKey) -> Result<Option<Conversation>> {
        let index = load_map(&self.session_key_index_path()).await?;
        match index.get(&session_key.format()) {
            Some(id) => self.get_conversation(id).await,
            None => Ok(None),
        }
    }

    pub async fn get_or_create_conversation(&self, session_key: &SessionKey) -> Result<Conversation> {
        if let Some(existing) = self.get_conversation_by_session_key(session_key).await? {
            return Ok(existing);
        }
        self.create_conversation(session_key.clone()).await
    }

    #[instrument(skip(self))]
    pub async fn archive_conversation(&self, id: &str) -> Result<Conversation> {
        let mut conversation = self
            .get_conversation(id)
            .await?
            .ok_or_else(|| ConversationStoreError::NotFound(id.to_string()))?;
        conversation.status = ConversationStatus::Archived;
        conversation.updated_at = now_rfc3339();
        write_yaml(&self.yaml_path(id), &conversation).await?;
        let _ = self
            .events_tx
            .send(ConversationStoreEvent::ConversationArchived(conversation.clone()));
        Ok(conversation)
    }

    #[instrument(skip(self, input), fields(conversation_id = %id))]
    pub async fn append_turn(&self, id: &str, input: AppendTurnInput) -> Result<AppendTurnOutcome> {
        if input.start_seq > input.end_seq {
            return Err(CoreError::validation("start_seq", "start_seq must be <= end_seq").into());
        }
        if input.session_id.trim().is_empty() {
            return Err(CoreError::validation("session_id", "session_id must not be empty").into());
        }
        if !self.conversation_dir(id).join("conversation.yaml").exists() {
            return Err(ConversationStoreError::NotFound(id.to_string()));
        }

        if let Some(sessions) = &self.sessions {
            if !sessions.session_exists(&input.session_id).await.map_err(|e| {
                ConversationStoreError::Core(CoreError::Internal(e.to_string()))
            })? {
                return Err(ConversationStoreError::Core(CoreError::InvalidSessionRef(
                    input.session_id.clone(),
                )));
            }
        }

        let _lock = FileLock::acquire(&self.lock_path(id), self.lock_timeout).await?;

        if let Some(message_id) = &input.message_id {
            let index = load_seq_map(&self.message_id_index_path(id)).await?;
            if let Some(&seq) = index.get(message_id) {
                if let Some(turn) = self.find_turn_by_seq(id, seq).await? {
                    return Ok(AppendTurnOutcome { turn, was_duplicate: true });
                }
            }
        }

        let turns_path = self.turns_path(id);
        let existing = tokio::fs::read_to_string(&turns_path).await.unwrap_or_default();
        let seq = existing.lines().filter(|l| !l.trim().is_empty()).count() as u64;

        let turn = Turn {
            seq,
            session_id: input.session_id.clone(),
            role: input.role,
            message_id: input.message_id.clone(),
            event_range: EventRange {
                start_seq: input.start_seq,
                end_seq: input.end_seq,
            },
            created_at: now_rfc3339(),
        };

        let mut line = serde_json::to_string(&turn).map_err(CoreError::from)?;
        line.push('\n');
        let mut f = tokio::fs::OpenOptions::new().append(true).open(&turns_path).await?;
        f.write_all(line.as_bytes()).await?;
        f.flush().await?;

        if let Some(message_id) = &input.message_id {
            let mut index = load_seq_map(&self.message_id_index_path(id)).await?;
            index.insert(message_id.clone(), seq);
            save_seq_map(&self.message_id_index_path(id), &index).await?;
        }

        let mut conversation = self
            .get_conversation(id)
            .await?
            .ok_or_else(|| ConversationStoreError::NotFound(id.to_string()))?;
        conversation.turn_count = seq + 1;
        conversation.updated_at = now_rfc3339();
        write_yaml(&self.yaml_path(id), &conversation).await?;

        let _ = self.events_tx.send(ConversationStoreEvent::TurnAppended {
            conversation_id: id.to_string(),
            seq,
            was_duplicate: false,
        });

        Ok(AppendTurnOutcome { turn, was_duplicate: false })
    }

    async fn find_turn_by_seq(&self, id: &str, seq: u64) -> Result<Option<Turn>> {
        let (turns, _) = self.read_turns_raw(id).await?;
        Ok(turns.into_iter().find(|t| t.seq == seq))
    }

    /// Tolerant reader; if the message-id index is missing but turns exist,
    /// rebuilds it from the turn log so idempotency keeps working after a
    /// lost or corrupted index file.
    pub async fn read_turns(&self, id: &str) -> Result<Vec<Turn>> {
        let (turns, skipped) = self.read_turns_raw(id).await?;
        if skipped > 0 {
            let _ = self.events_tx.send(ConversationStoreEvent::ReadError {
                conversation_id: id.to_string(),
                skipped,
            });
        }

        let index_path = self.message_id_index_path(id);
        if !index_path.exists() && turns.iter().any(|t| t.message_id.is_some()) {
            let mut index = std::collections::HashMap::new();
            for turn in &turns {
                if let Some(message_id) = &turn.message_id {
                    index.insert(message_id.clone(), turn.seq);
                }
            }
            save_seq_map(&index_path, &index).await?;
        }

        Ok(turns)
    }

    async fn read_turns_raw(&self, id: &str) -> Result<(Vec<Turn>, u64)> {
        let path = self.turns_path(id);
        if !path.exists() {
            return Ok((Vec::new(), 0));
        }
        let raw = tokio::fs::read_to_string(&path).await?;
        let mut turns = Vec::new();
        let mut skipped = 0u64;
        for line in raw.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Turn>(trimmed) {
                Ok(turn) => turns.push(turn),
                Err(_) => skipped += 1,
            }
        }
        turns.sort_by_key(|t| t.seq);
        Ok((turns, skipped))
    }
}

async fn write_yaml<T: serde::Serialize>(path: &std::path::Path, value: &T) -> Result<()> {
    let yaml = serde_yaml::to_string(value).map_err(CoreError::from)?;
    tokio::fs::write(path, yaml).await?;
    Ok(())
}

async fn read_yaml<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path).await?;
    serde_yaml::from_str(&raw).map_err(|e| ConversationStoreError::Core(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TurnRole;

    fn key() -> SessionKey {
        SessionKey::new("main", "discord", "dm", "u1")
    }

    #[tokio::test]
    async fn create_then_lookup_by_session_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        let conversation = store.create_conversation(key()).await.unwrap();

        let found = store.get_conversation_by_session_key(&key()).await.unwrap().unwrap();
        assert_eq!(found.id, conversation.id);
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        let a = store.get_or_create_conversation(&key()).await.unwrap();
        let b = store.get_or_create_conversation(&key()).await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn append_turn_with_duplicate_message_id_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        let conversation = store.create_conversation(key()).await.unwrap();

        let first = store
            .append_turn(
                conversation.id.as_str(),
                AppendTurnInput {
                    session_id: "sess-1".to_string(),
                    role: TurnRole::User,
                    message_id: Some("m1".to_string()),
                    start_seq: 0,
                    end_seq: 0,
                },
            )
            .await
            .unwrap();
        assert!(!first.was_duplicate);

        let second = store
            .append_turn(
                conversation.id.as_str(),
                AppendTurnInput {
                    session_id: "sess-1".to_string(),
                    role: TurnRole::User,
                    message_id: Some("m1".to_string()),
                    start_seq: 0,
                    end_seq: 1,
                },
            )
            .await
            .unwrap();
        assert!(second.was_duplicate);
        assert_eq!(second.turn.seq, first.turn.seq);
    }

    #[tokio::test]
    async fn archive_sets_status_and_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        let conversation = store.create_conversation(key()).await.unwrap();
        let archived = store.archive_conversation(conversation.id.as_str()).await.unwrap();
        assert_eq!(archived.status, ConversationStatus::Archived);
    }
}
