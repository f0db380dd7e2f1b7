pub mod error;
pub mod events;
pub mod manager;
pub mod types;

pub use error::{Result, SessionStoreError};
pub use events::SessionStoreEvent;
pub use manager::SessionStore;
pub use types::{
    AgentSession, AppendEventInput, CreateSessionInput, SessionEvent, SessionFilter,
    SessionStatus, SESSION_EVENT_TYPES,
};
