use kbot_core::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SessionStoreError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionStoreError::Core(e) => e.code(),
            SessionStoreError::NotFound(_) => "SESSION_NOT_FOUND",
            SessionStoreError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionStoreError>;
