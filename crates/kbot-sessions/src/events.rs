//! Observability events for the session store. These are broadcast-only:
//! nothing downstream depends on receiving them for correctness.

use crate::types::AgentSession;

#[derive(Debug, Clone)]
pub enum SessionStoreEvent {
    SessionCreated(AgentSession),
    SessionUpdated(AgentSession),
    SessionEnded(AgentSession),
    EventAppended { session_id: String, seq: u64 },
    /// Emitted at most once per `read_events`/`read_turns`-style call when
    /// one or more lines failed to parse.
    ReadError { session_id: String, skipped: u64 },
}
