use kbot_core::CoreError;
use kbot_sessions::error::SessionStoreError;

#[derive(Debug, thiserror::Error)]
pub enum ConversationStoreError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("conversation not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Session(#[from] SessionStoreError),
}

impl ConversationStoreError {
    pub fn code(&self) -> &'static str {
        match self {
            ConversationStoreError::Core(e) => e.code(),
            ConversationStoreError::NotFound(_) => "CONVERSATION_NOT_FOUND",
            ConversationStoreError::Session(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConversationStoreError>;
