//! Session_key → live ACP session mapping, with reuse/rotate/recover
//! policy and per-key serialization.
//!
//! The per-key lock chain described for the originating system ("each
//! call stores a deferred; the nth call awaits the (n-1)th's release")
//! is realized here as a lazily-created `tokio::sync::Mutex` per key in a
//! `DashMap`; holding the guard for the duration of the closure gives the
//! same FIFO-per-key, concurrent-across-keys behavior, and `Drop` plays
//! the role of the original's `finally`.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kbot_conversations::ConversationStore;
use kbot_core::{AgentRegistry, SessionKey};
use kbot_sessions::{CreateSessionInput, SessionStore};
use tokio::sync::{broadcast, Mutex};
use tracing::{instrument, warn};

use crate::acp::AcpClient;
use crate::error::Result;
use crate::events::LifecycleEvent;
use crate::types::{GetOrCreateOutcome, GetOrCreateResult, LifecycleConfig, LiveSession};

pub struct SessionLifecycle {
    config: LifecycleConfig,
    conversations: Arc<ConversationStore>,
    sessions: Arc<SessionStore>,
    agents: Option<Arc<AgentRegistry>>,
    live: DashMap<String, LiveSession>,
    key_locks: DashMap<String, Arc<Mutex<()>>>,
    events_tx: broadcast::Sender<LifecycleEvent>,
}

impl SessionLifecycle {
    pub fn new(conversations: Arc<ConversationStore>, sessions: Arc<SessionStore>) -> Self {
        Self::with_config(conversations, sessions, LifecycleConfig::default())
    }

    pub fn with_config(
        conversations: Arc<ConversationStore>,
        sessions: Arc<SessionStore>,
        config: LifecycleConfig,
    ) -> Self {
        Self::new_inner(conversations, sessions, config, None)
    }

    /// Like [`Self::with_config`], but validates every session key's
    /// `agent` segment against `agents` before creating or rotating a
    /// session, rejecting unknown agents with `CoreError::UnknownAgent`.
    pub fn with_agents(
        conversations: Arc<ConversationStore>,
        sessions: Arc<SessionStore>,
        config: LifecycleConfig,
        agents: Arc<AgentRegistry>,
    ) -> Self {
        Self::new_inner(conversations, sessions, config, Some(agents))
    }

    fn new_inner(
        conversations: Arc<ConversationStore>,
        sessions: Arc<SessionStore>,
        config: LifecycleConfig,
        agents: Option<Arc<AgentRegistry>>,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            config,
            conversations,
            sessions,
            agents,
            live: DashMap::new(),
            key_locks: DashMap::new(),
            events_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events_tx.subscribe()
    }

    pub async fn with_lock<F, Fut, T>(&self, key: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self
            .key_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;
        f().await
    }

    fn rotation_warranted(&self, live: &LiveSession) -> bool {
        match live.usage_pct {
            Some(pct) => pct >= self.config.rotation_threshold_pct,
            None => false,
        }
    }

    #[instrument(skip(self, client), fields(session_key = %key))]
    pub async fn get_or_create_session(
        &self,
        key: &SessionKey,
        client: &dyn AcpClient,
    ) -> Result<GetOrCreateResult> {
        if let Some(agents) = &self.agents {
            agents.resolve(&key.agent)?;
        }
        let key_str = key.format();
        self.with_lock(&key_str, || async {
            if let Some(live) = self.live.get(&key_str) {
                if !self.rotation_warranted(&live) {
                    return Ok(GetOrCreateResult {
                        acp_session_id: live.acp_session_id.clone(),
                        outcome: GetOrCreateOutcome::default(),
                    });
                }
            }

            if self.live.contains_key(&key_str) {
                return self.rotate_session(key, client).await;
            }

            let existing_conversation = self.conversations.get_conversation_by_session_key(key).await?;
            let was_recovered = existing_conversation
                .as_ref()
                .map(|c| within_recent_window(&c.updated_at, self.config.recent_conversation_window_secs))
                .unwrap_or(false);

            let acp_session_id = client.new_session().await?;

            let (session_id, conversation_id) = if let Some(conversation) = &existing_conversation {
                let session = self
                    .sessions
                    .create_session(CreateSessionInput {
                        id: None,
                        agent: key.agent.clone(),
                        conversation_id: Some(conversation.id.clone()),
                        session_key: key.clone(),
                    })
                    .await?;
                (Some(session.id.as_str().to_string()), Some(conversation.id.as_str().to_string()))
            } else {
                (None, None)
            };

            self.live.insert(
                key_str.clone(),
                LiveSession {
                    acp_session_id: acp_session_id.clone(),
                    session_id,
                    conversation_id,
                    usage_pct: None,
                },
            );

            let event = if was_recovered {
                LifecycleEvent::SessionRecovered {
                    session_key: key_str.clone(),
                    acp_session_id: acp_session_id.clone(),
                }
            } else {
                LifecycleEvent::SessionCreated {
                    session_key: key_str.clone(),
                    acp_session_id: acp_session_id.clone(),
                }
            };
            let _ = self.events_tx.send(event);

            Ok(GetOrCreateResult {
                acp_session_id,
                outcome: GetOrCreateOutcome {
                    is_new: true,
                    was_rotated: false,
                    was_recovered,
                },
            })
        })
        .await
    }

    #[instrument(skip(self, client), fields(session_key = %key))]
    pub async fn rotate_session(
        &self,
        key: &SessionKey,
        client: &dyn AcpClient,
    ) -> Result<GetOrCreateResult> {
        let key_str = key.format();
        let old = self.live.get(&key_str).map(|l| l.clone());
        let new_acp_session_id = client.new_session().await?;

        let conversation_id = old.as_ref().and_then(|l| l.conversation_id.clone());
        let session_id = if let Some(conversation_id) = &conversation_id {
            let conv_id = kbot_core::ConversationId::from(conversation_id.clone());
            let session = self
                .sessions
                .create_session(CreateSessionInput {
                    id: None,
                    agent: key.agent.clone(),
                    conversation_id: Some(conv_id),
                    session_key: key.clone(),
                })
                .await?;
            Some(session.id.as_str().to_string())
        } else {
            None
        };

        if let Some(old) = &old {
            if let Some(old_session_id) = &old.session_id {
                if let Err(err) = self.sessions.complete_session(old_session_id).await {
                    warn!(error = %err, "failed to mark rotated-away session completed");
                }
            }
        }

        self.live.insert(
            key_str.clone(),
            LiveSession {
                acp_session_id: new_acp_session_id.clone(),
                session_id,
                conversation_id,
                usage_pct: None,
            },
        );

        let _ = self.events_tx.send(LifecycleEvent::SessionRotated {
            session_key: key_str,
            old_acp_session_id: old.map(|l| l.acp_session_id).unwrap_or_default(),
            new_acp_session_id: new_acp_session_id.clone(),
        });

        Ok(GetOrCreateResult {
            acp_session_id: new_acp_session_id,
            outcome: GetOrCreateOutcome {
                is_new: true,
                was_rotated: true,
                was_recovered: false,
            },
        })
    }

    /// Ignored for unknown keys, per the edge-case rule that unmatched
    /// usage updates are silently dropped rather than treated as errors.
    pub fn update_usage(&self, key: &SessionKey, percentage: f64) {
        if let Some(mut live) = self.live.get_mut(&key.format()) {
            live.usage_pct = Some(percentage);
        }
    }

    pub async fn end_session(&self, key: &SessionKey) -> Result<()> {
        let key_str = key.format();
        if let Some((_, live)) = self.live.remove(&key_str) {
            if let Some(session_id) = &live.session_id {
                if let Err(err) = self.sessions.complete_session(session_id).await {
                    warn!(error = %err, "failed to complete session on end_session");
                }
            }
        }
        let _ = self.events_tx.send(LifecycleEvent::SessionEnded { session_key: key_str });
        Ok(())
    }

    pub fn live_session(&self, key: &SessionKey) -> Option<LiveSession> {
        self.live.get(&key.format()).map(|l| l.clone())
    }
}

fn within_recent_window(updated_at_rfc3339: &str, window_secs: i64) -> bool {
    let parsed: std::result::Result<DateTime<Utc>, _> = DateTime::parse_from_rfc3339(updated_at_rfc3339)
        .map(|dt| dt.with_timezone(&Utc));
    match parsed {
        Ok(updated_at) => (Utc::now() - updated_at).num_seconds() <= window_secs,
        Err(_) => false,
    }
}
