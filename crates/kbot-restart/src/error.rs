#[derive(Debug, thiserror::Error)]
pub enum RestartError {
    #[error("no ipc channel available")]
    NoIpcChannel,

    #[error("a restart request is already pending")]
    RestartPending,

    #[error("restart ack timed out after {ms}ms")]
    AckTimeout { ms: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RestartError {
    pub fn code(&self) -> &'static str {
        match self {
            RestartError::NoIpcChannel => "NO_IPC_CHANNEL",
            RestartError::RestartPending => "RESTART_PENDING",
            RestartError::AckTimeout { .. } => "ACK_TIMEOUT",
            RestartError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RestartError>;
