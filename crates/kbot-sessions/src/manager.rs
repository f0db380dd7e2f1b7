//! Durable agent-session metadata (`session.yaml`) plus an append-only
//! event log (`events.jsonl`), one directory per session under
//! `<base_dir>/sessions/<id>/`.
//!
//! Method shapes, upsert idioms, and `#[instrument]` placement are adapted
//! from `skynet_sessions::manager::SessionManager`, which is SQLite-backed;
//! here the same surface is realized over YAML + JSONL files, per the
//! file-only storage mandate.

use std::path::{Path, PathBuf};
use std::time::Duration;

use kbot_core::lock::FileLock;
use kbot_core::time::{now_ms, now_rfc3339};
use kbot_core::SessionId;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tracing::instrument;

use crate::error::{Result, SessionStoreError};
use crate::events::SessionStoreEvent;
use crate::types::{
    AgentSession, AppendEventInput, CreateSessionInput, SessionEvent, SessionFilter,
    SessionStatus,
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SessionStore {
    base_dir: PathBuf,
    lock_timeout: Duration,
    events_tx: broadcast::Sender<SessionStoreEvent>,
}

impl SessionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self::with_lock_timeout(base_dir, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(base_dir: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            base_dir: base_dir.into(),
            lock_timeout,
            events_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionStoreEvent> {
        self.events_tx.subscribe()
    }

    fn sessions_root(&self) -> PathBuf {
        self.base_dir.join("sessions")
    }

    fn session_dir(&self, id: &str) -> PathBuf {
        self.sessions_root().join(id)
    }

    fn yaml_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("session.yaml")
    }

    fn events_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("events.jsonl")
    }

    fn lock_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join(".lock")
    }

    #[instrument(skip(self, input), fields(agent = %input.agent))]
    pub async fn create_session(&self, input: CreateSessionInput) -> Result<AgentSession> {
        if input.agent.trim().is_empty() {
            return Err(SessionStoreError::Core(kbot_core::CoreError::validation(
                "agent",
                "agent must not be empty",
            )));
        }

        let id = input.id.unwrap_or_default();
        let session = AgentSession {
            id,
            agent: input.agent,
            conversation_id: input.conversation_id,
            session_key: input.session_key,
            status: SessionStatus::Active,
            started_at: now_rfc3339(),
            ended_at: None,
        };

        let dir = self.session_dir(session.id.as_str());
        tokio::fs::create_dir_all(&dir).await?;
        write_yaml(&self.yaml_path(session.id.as_str()), &session).await?;
        tokio::fs::write(self.events_path(session.id.as_str()), b"").await?;

        let _ = self
            .events_tx
            .send(SessionStoreEvent::SessionCreated(session.clone()));
        Ok(session)
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<AgentSession>> {
        let path = self.yaml_path(id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(read_yaml(&path).await?))
    }

    pub async fn session_exists(&self, id: &str) -> Result<bool> {
        Ok(self.yaml_path(id).exists())
    }

    pub async fn list_sessions(&self, filter: SessionFilter) -> Result<Vec<AgentSession>> {
        let root = self.sessions_root();
        if !root.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let yaml = entry.path().join("session.yaml");
            if !yaml.exists() {
                continue;
            }
            let session: AgentSession = read_yaml(&yaml).await?;
            if filter.matches(&session) {
                out.push(session);
            }
        }
        out.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(out)
    }

    #[instrument(skip(self))]
    pub async fn update_session_status(
        &self,
        id: &str,
        status: SessionStatus,
    ) -> Result<AgentSession> {
        let mut session = self
            .get_session(id)
            .await?
            .ok_or_else(|| SessionStoreError::NotFound(id.to_string()))?;

        session.status = status;
        if status.is_terminal() {
            session.ended_at = Some(now_rfc3339());
        }

        write_yaml(&self.yaml_path(id), &session).await?;

        let event = if status.is_terminal() {
            SessionStoreEvent::SessionEnded(session.clone())
        } else {
            SessionStoreEvent::SessionUpdated(session.clone())
        };
        let _ = self.events_tx.send(event);
        Ok(session)
    }

    pub async fn complete_session(&self, id: &str) -> Result<AgentSession> {
        self.update_session_status(id, SessionStatus::Completed).await
    }

    /// Appends under the per-session lock: recounts lines to assign the
    /// next `seq`, stamps `ts = now()` unless already set, and writes a
    /// single JSON line. At-most-one append-in-flight is guaranteed by the
    /// lock, not by any in-process mutex, so it also holds across process
    /// restarts.
    #[instrument(skip(self, input), fields(session_id = %id))]
    pub async fn append_event(&self, id: &str, input: AppendEventInput) -> Result<SessionEvent> {
        if !self.session_exists(id).await? {
            return Err(SessionStoreError::NotFound(id.to_string()));
        }

        let _lock = FileLock::acquire(&self.lock_path(id), self.lock_timeout).await?;

        let events_path = self.events_path(id);
        let existing = tokio::fs::read_to_string(&events_path).await.unwrap_or_default();
        let seq = existing.lines().filter(|l| !l.trim().is_empty()).count() as u64;

        let event = SessionEvent {
            ts: input.ts.unwrap_or_else(now_ms),
            seq,
            event_type: input.event_type,
            session_id: id.to_string(),
            trace_id: input.trace_id,
            data: input.data,
        };

        let mut line = serde_json::to_string(&event).map_err(kbot_core::CoreError::from)?;
        line.push('\n');

        let mut f = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&events_path)
            .await?;
        f.write_all(line.as_bytes()).await?;
        f.flush().await?;

        let _ = self.events_tx.send(SessionStoreEvent::EventAppended {
            session_id: id.to_string(),
            seq,
        });
        Ok(event)
    }

    pub async fn read_events(&self, id: &str) -> Result<Vec<SessionEvent>> {
        self.read_events_filtered(id, None, None).await
    }

    pub async fn read_events_since(
        &self,
        id: &str,
        since: u64,
        until: Option<u64>,
    ) -> Result<Vec<SessionEvent>> {
        self.read_events_filtered(id, Some(since), until).await
    }

    async fn read_events_filtered(
        &self,
        id: &str,
        since: Option<u64>,
        until: Option<u64>,
    ) -> Result<Vec<SessionEvent>> {
        let (mut events, skipped) = read_jsonl_tolerant::<SessionEvent>(&self.events_path(id)).await?;
        events.sort_by_key(|e| e.seq);
        if let Some(since) = since {
            events.retain(|e| e.seq >= since);
        }
        if let Some(until) = until {
            events.retain(|e| e.seq <= until);
        }
        if skipped > 0 {
            let _ = self.events_tx.send(SessionStoreEvent::ReadError {
                session_id: id.to_string(),
                skipped,
            });
        }
        Ok(events)
    }

    pub async fn get_last_event(&self, id: &str) -> Result<Option<SessionEvent>> {
        let events = self.read_events(id).await?;
        Ok(events.into_iter().last())
    }

    pub async fn get_event_count(&self, id: &str) -> Result<u64> {
        Ok(self.read_events(id).await?.len() as u64)
    }

    /// On startup, transitions every `active` session to `abandoned`.
    /// Returns the number of sessions recovered.
    #[instrument(skip(self))]
    pub async fn recover_orphaned_sessions(&self) -> Result<u64> {
        let active = self
            .list_sessions(SessionFilter {
                status: Some(SessionStatus::Active),
                agent: None,
            })
            .await?;

        let mut recovered = 0u64;
        for session in active {
            self.update_session_status(session.id.as_str(), SessionStatus::Abandoned)
                .await?;
            recovered += 1;
        }
        Ok(recovered)
    }
}

async fn write_yaml<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let yaml = serde_yaml::to_string(value).map_err(kbot_core::CoreError::from)?;
    tokio::fs::write(path, yaml).await?;
    Ok(())
}

async fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path).await?;
    serde_yaml::from_str(&raw).map_err(|e| SessionStoreError::Core(e.into()))
}

/// Reads every non-empty line, skipping ones that fail JSON parse or
/// schema validation, and returns the parsed records plus a single skipped
/// count (the summary is emitted once per read, never once per bad line).
async fn read_jsonl_tolerant<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<(Vec<T>, u64)> {
    if !path.exists() {
        return Ok((Vec::new(), 0));
    }
    let raw = tokio::fs::read_to_string(path).await?;
    let mut out = Vec::new();
    let mut skipped = 0u64;
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(trimmed) {
            Ok(v) => out.push(v),
            Err(_) => skipped += 1,
        }
    }
    Ok((out, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbot_core::SessionKey;

    fn key() -> SessionKey {
        SessionKey::new("main", "discord", "dm", "user1")
    }

    #[tokio::test]
    async fn create_and_get_session_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let session = store
            .create_session(CreateSessionInput {
                id: None,
                agent: "main".to_string(),
                conversation_id: None,
                session_key: key(),
            })
            .await
            .unwrap();

        let fetched = store.get_session(session.id.as_str()).await.unwrap().unwrap();
        assert_eq!(fetched.id, session.id);
        assert_eq!(fetched.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn append_event_assigns_dense_seq() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let session = store
            .create_session(CreateSessionInput {
                id: None,
                agent: "main".to_string(),
                conversation_id: None,
                session_key: key(),
            })
            .await
            .unwrap();

        for i in 0..3 {
            let event = store
                .append_event(
                    session.id.as_str(),
                    AppendEventInput {
                        event_type: "message.chunk".to_string(),
                        trace_id: None,
                        data: serde_json::json!({ "content": format!("chunk-{i}") }),
                        ts: None,
                    },
                )
                .await
                .unwrap();
            assert_eq!(event.seq, i);
        }

        let events = store.read_events(session.id.as_str()).await.unwrap();
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn update_status_to_completed_stamps_ended_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let session = store
            .create_session(CreateSessionInput {
                id: None,
                agent: "main".to_string(),
                conversation_id: None,
                session_key: key(),
            })
            .await
            .unwrap();

        let updated = store
            .update_session_status(session.id.as_str(), SessionStatus::Completed)
            .await
            .unwrap();
        assert!(updated.ended_at.is_some());
    }

    #[tokio::test]
    async fn recover_orphaned_sessions_abandons_active_ones() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store
            .create_session(CreateSessionInput {
                id: None,
                agent: "main".to_string(),
                conversation_id: None,
                session_key: key(),
            })
            .await
            .unwrap();

        let recovered = store.recover_orphaned_sessions().await.unwrap();
        assert_eq!(recovered, 1);

        let sessions = store.list_sessions(SessionFilter::default()).await.unwrap();
        assert_eq!(sessions[0].status, SessionStatus::Abandoned);
    }

    #[tokio::test]
    async fn tolerant_reader_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let session = store
            .create_session(CreateSessionInput {
                id: None,
                agent: "main".to_string(),
                conversation_id: None,
                session_key: key(),
            })
            .await
            .unwrap();

        store
            .append_event(
                session.id.as_str(),
                AppendEventInput {
                    event_type: "prompt.sent".to_string(),
                    trace_id: None,
                    data: serde_json::json!({ "content": "hi" }),
                    ts: None,
                },
            )
            .await
            .unwrap();

        let events_path = store.events_path(session.id.as_str());
        let mut existing = tokio::fs::read_to_string(&events_path).await.unwrap();
        existing.push_str("not valid json\n");
        tokio::fs::write(&events_path, existing).await.unwrap();

        let events = store.read_events(session.id.as_str()).await.unwrap();
        assert_eq!(events.len(), 1);
    }
}
