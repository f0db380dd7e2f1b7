use kbot_core::SessionKey;
use kbot_sessions::{AppendEventInput, CreateSessionInput, SessionFilter, SessionStatus, SessionStore};

fn key(peer: &str) -> SessionKey {
    SessionKey::new("main", "telegram", "dm", peer)
}

#[tokio::test]
async fn full_session_lifecycle_persists_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());

    let session = store
        .create_session(CreateSessionInput {
            id: None,
            agent: "main".to_string(),
            conversation_id: None,
            session_key: key("100"),
        })
        .await
        .unwrap();

    assert!(dir.path().join("sessions").join(session.id.as_str()).join("session.yaml").exists());

    store
        .append_event(
            session.id.as_str(),
            AppendEventInput {
                event_type: "session.start".to_string(),
                trace_id: None,
                data: serde_json::json!({}),
                ts: None,
            },
        )
        .await
        .unwrap();

    store
        .update_session_status(session.id.as_str(), SessionStatus::Completed)
        .await
        .unwrap();

    let fetched = store.get_session(session.id.as_str()).await.unwrap().unwrap();
    assert_eq!(fetched.status, SessionStatus::Completed);
    assert_eq!(store.get_event_count(session.id.as_str()).await.unwrap(), 1);
}

#[tokio::test]
async fn list_sessions_filters_by_status_and_agent() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());

    let a = store
        .create_session(CreateSessionInput {
            id: None,
            agent: "main".to_string(),
            conversation_id: None,
            session_key: key("1"),
        })
        .await
        .unwrap();
    let b = store
        .create_session(CreateSessionInput {
            id: None,
            agent: "support".to_string(),
            conversation_id: None,
            session_key: key("2"),
        })
        .await
        .unwrap();
    store.complete_session(a.id.as_str()).await.unwrap();

    let active = store
        .list_sessions(SessionFilter {
            status: Some(SessionStatus::Active),
            agent: None,
        })
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, b.id);

    let support_only = store
        .list_sessions(SessionFilter {
            status: None,
            agent: Some("support".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(support_only.len(), 1);
    assert_eq!(support_only[0].agent, "support");
}

#[tokio::test]
async fn get_session_for_unknown_id_is_none_not_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());
    assert!(store.get_session("does-not-exist").await.unwrap().is_none());
}
