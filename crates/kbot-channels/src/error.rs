#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel is not healthy")]
    NotHealthy,

    #[error("send queue is full")]
    QueueFull,

    #[error("message rejected after {attempts} attempts: {reason}")]
    MaxAttemptsExceeded { attempts: u32, reason: String },

    #[error("shutdown drain timed out")]
    DrainTimeout,

    #[error("adapter error: {0}")]
    Adapter(String),

    #[error("adapter for platform '{platform}' is missing required capabilities: {missing:?}")]
    MissingCapabilities { platform: String, missing: Vec<String> },
}

impl ChannelError {
    pub fn code(&self) -> &'static str {
        match self {
            ChannelError::NotHealthy => "CHANNEL_NOT_HEALTHY",
            ChannelError::QueueFull => "QUEUE_FULL",
            ChannelError::MaxAttemptsExceeded { .. } => "MAX_ATTEMPTS_EXCEEDED",
            ChannelError::DrainTimeout => "DRAIN_TIMEOUT",
            ChannelError::Adapter(_) => "ADAPTER_ERROR",
            ChannelError::MissingCapabilities { .. } => "MISSING_CAPABILITIES",
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
