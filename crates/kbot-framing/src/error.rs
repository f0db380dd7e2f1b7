use kbot_protocol::frames::RpcErrorObject;

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("remote returned an error: {0:?}")]
    Remote(RpcErrorObject),

    #[error("operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("framing transport closed")]
    Closed,

    #[error("the underlying stream failed: {0}")]
    Io(#[from] std::io::Error),
}

impl FramingError {
    pub fn code(&self) -> &'static str {
        match self {
            FramingError::Remote(_) => "REMOTE_ERROR",
            FramingError::Timeout { .. } => "TIMEOUT",
            FramingError::Closed => "CLOSED",
            FramingError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, FramingError>;
