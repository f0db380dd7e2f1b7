//! The ACP (agent control protocol) surface `SessionLifecycle` and
//! `ContextUsageTracker` drive. The concrete client lives above this
//! crate (it owns the child process and its framing layer); callers
//! supply an implementation so this crate stays ignorant of transport.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;

#[async_trait]
pub trait AcpClient: Send + Sync {
    /// Starts a brand new agent session and returns its id.
    async fn new_session(&self) -> Result<String>;

    /// Sends the `/usage` probe prompt into an existing session.
    async fn send_usage_prompt(&self, session_id: &str) -> Result<()>;

    /// Subscribes to the raw stderr stream for a session; the tracker
    /// reads lines off this until it finds a usage block or times out.
    async fn subscribe_stderr(&self, session_id: &str) -> broadcast::Receiver<String>;
}
