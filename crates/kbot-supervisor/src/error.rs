#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to spawn child: {0}")]
    SpawnFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl SupervisorError {
    pub fn code(&self) -> &'static str {
        match self {
            SupervisorError::SpawnFailed(_) => "SPAWN_FAILED",
            SupervisorError::Io(_) => "IO_ERROR",
            SupervisorError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
