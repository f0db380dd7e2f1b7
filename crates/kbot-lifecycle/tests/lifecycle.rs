use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use kbot_conversations::ConversationStore;
use kbot_core::{AgentRegistry, SessionKey};
use kbot_lifecycle::{AcpClient, LifecycleConfig, Result as LifecycleResult, SessionLifecycle};
use kbot_sessions::SessionStore;
use tokio::sync::broadcast;

struct FakeAcpClient {
    counter: AtomicU64,
}

impl FakeAcpClient {
    fn new() -> Self {
        Self { counter: AtomicU64::new(0) }
    }
}

#[async_trait]
impl AcpClient for FakeAcpClient {
    async fn new_session(&self) -> LifecycleResult<String> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("acp-session-{n}"))
    }

    async fn send_usage_prompt(&self, _session_id: &str) -> LifecycleResult<()> {
        Ok(())
    }

    async fn subscribe_stderr(&self, _session_id: &str) -> broadcast::Receiver<String> {
        let (_tx, rx) = broadcast::channel(1);
        rx
    }
}

fn key() -> SessionKey {
    SessionKey::new("main", "discord", "dm", "u1")
}

#[tokio::test]
async fn first_call_creates_a_new_session() {
    let dir = tempfile::tempdir().unwrap();
    let conversations = Arc::new(ConversationStore::new(dir.path()));
    let sessions = Arc::new(SessionStore::new(dir.path()));
    let lifecycle = SessionLifecycle::new(conversations, sessions);
    let client = FakeAcpClient::new();

    let result = lifecycle.get_or_create_session(&key(), &client).await.unwrap();
    assert!(result.outcome.is_new);
    assert!(!result.outcome.was_rotated);
}

#[tokio::test]
async fn second_call_without_rotation_reuses_session() {
    let dir = tempfile::tempdir().unwrap();
    let conversations = Arc::new(ConversationStore::new(dir.path()));
    let sessions = Arc::new(SessionStore::new(dir.path()));
    let lifecycle = SessionLifecycle::new(conversations, sessions);
    let client = FakeAcpClient::new();

    let first = lifecycle.get_or_create_session(&key(), &client).await.unwrap();
    let second = lifecycle.get_or_create_session(&key(), &client).await.unwrap();
    assert!(!second.outcome.is_new);
    assert_eq!(first.acp_session_id, second.acp_session_id);
}

#[tokio::test]
async fn usage_above_threshold_triggers_rotation_on_next_call() {
    let dir = tempfile::tempdir().unwrap();
    let conversations = Arc::new(ConversationStore::new(dir.path()));
    let sessions = Arc::new(SessionStore::new(dir.path()));
    let lifecycle = SessionLifecycle::with_config(
        conversations,
        sessions,
        LifecycleConfig { rotation_threshold_pct: 50.0, recent_conversation_window_secs: 1800 },
    );
    let client = FakeAcpClient::new();

    let first = lifecycle.get_or_create_session(&key(), &client).await.unwrap();
    lifecycle.update_usage(&key(), 75.0);
    let second = lifecycle.get_or_create_session(&key(), &client).await.unwrap();

    assert!(second.outcome.was_rotated);
    assert!(second.outcome.is_new);
    assert_ne!(first.acp_session_id, second.acp_session_id);
}

#[tokio::test]
async fn get_or_create_session_rejects_an_unregistered_agent() {
    let dir = tempfile::tempdir().unwrap();
    let conversations = Arc::new(ConversationStore::new(dir.path()));
    let sessions = Arc::new(SessionStore::new(dir.path()));
    let agents = Arc::new(AgentRegistry::new(std::collections::BTreeMap::new()));
    let lifecycle = SessionLifecycle::with_agents(conversations, sessions, LifecycleConfig::default(), agents);
    let client = FakeAcpClient::new();

    let err = lifecycle.get_or_create_session(&key(), &client).await.unwrap_err();
    assert_eq!(err.code(), "UNKNOWN_AGENT");
}

#[tokio::test]
async fn update_usage_for_unknown_key_is_a_silent_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let conversations = Arc::new(ConversationStore::new(dir.path()));
    let sessions = Arc::new(SessionStore::new(dir.path()));
    let lifecycle = SessionLifecycle::new(conversations, sessions);

    lifecycle.update_usage(&key(), 99.0);
    assert!(lifecycle.live_session(&key()).is_none());
}
