use kbot_conversations::ConversationStoreError;
use kbot_core::CoreError;
use kbot_sessions::SessionStoreError;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Sessions(#[from] SessionStoreError),

    #[error(transparent)]
    Conversations(#[from] ConversationStoreError),

    #[error("acp client error: {0}")]
    Acp(String),

    #[error("usage probe timed out after {ms}ms")]
    UsageTimeout { ms: u64 },
}

impl LifecycleError {
    pub fn code(&self) -> &'static str {
        match self {
            LifecycleError::Core(e) => e.code(),
            LifecycleError::Sessions(e) => e.code(),
            LifecycleError::Conversations(e) => e.code(),
            LifecycleError::Acp(_) => "ACP_ERROR",
            LifecycleError::UsageTimeout { .. } => "USAGE_TIMEOUT",
        }
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
