use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// An inbound message an adapter hands to its registered handler.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel: String,
    pub sender_id: String,
    pub payload: Value,
}

pub type InboundHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Declares which *optional* `ChannelAdapter` members an adapter actually
/// implements. Rust's trait system already guarantees every *required*
/// member exists at compile time, so this is the only thing left for
/// `ChannelRegistry` to validate at registration time — currently just
/// whether an adapter's `typing` override does anything beyond the
/// default no-op.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelCapabilities {
    pub typing: bool,
}

/// The platform-specific half of a channel (Discord, Telegram, ...). The
/// lifecycle state machine drives this trait; the adapter only knows how
/// to connect, send, receive, and probe health for its one platform.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Stable platform identifier, e.g. `"discord"`. Used as the
    /// `ChannelRegistry` key and as the `platform` field normalized
    /// messages carry.
    fn platform(&self) -> &str;

    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn health_check(&self) -> Result<()>;
    async fn send(&self, target: &str, payload: Value) -> Result<()>;
    async fn typing(&self, _target: &str) -> Result<()> {
        Ok(())
    }

    /// Registers the inbound handler the adapter dispatches platform
    /// events to; this is the entry point the channel lifecycle's
    /// dataflow depends on. Adapters with no real inbound transport may
    /// leave this a no-op.
    fn on_message(&self, _handler: InboundHandler) {}

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities::default()
    }
}
