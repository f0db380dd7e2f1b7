//! Indexes `ChannelAdapter`s by platform and checks that an adapter
//! declares whatever optional capabilities its caller actually needs
//! before wiring it in.

use std::sync::Arc;

use dashmap::DashMap;

use crate::adapter::ChannelAdapter;
use crate::error::{ChannelError, Result};

#[derive(Default)]
pub struct ChannelRegistry {
    adapters: DashMap<String, Arc<dyn ChannelAdapter>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `adapter` under its own `platform()`, rejecting it if it
    /// doesn't declare every capability in `required` (e.g. `&["typing"]`).
    pub fn register(&self, adapter: Arc<dyn ChannelAdapter>, required: &[&str]) -> Result<()> {
        let capabilities = adapter.capabilities();
        let missing: Vec<String> = required
            .iter()
            .filter(|&&name| !capability_present(&capabilities, name))
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ChannelError::MissingCapabilities {
                platform: adapter.platform().to_string(),
                missing,
            });
        }
        self.adapters.insert(adapter.platform().to_string(), adapter);
        Ok(())
    }

    pub fn get(&self, platform: &str) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(platform).map(|entry| entry.value().clone())
    }

    pub fn platforms(&self) -> Vec<String> {
        self.adapters.iter().map(|entry| entry.key().clone()).collect()
    }
}

fn capability_present(capabilities: &crate::adapter::ChannelCapabilities, name: &str) -> bool {
    match name {
        "typing" => capabilities.typing,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{ChannelCapabilities, InboundHandler};
    use async_trait::async_trait;
    use serde_json::Value;

    struct StubAdapter {
        platform: &'static str,
        typing: bool,
    }

    #[async_trait]
    impl ChannelAdapter for StubAdapter {
        fn platform(&self) -> &str {
            self.platform
        }
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
        async fn send(&self, _target: &str, _payload: Value) -> Result<()> {
            Ok(())
        }
        fn capabilities(&self) -> ChannelCapabilities {
            ChannelCapabilities { typing: self.typing }
        }
    }

    #[test]
    fn registers_an_adapter_with_no_required_capabilities() {
        let registry = ChannelRegistry::new();
        let adapter = Arc::new(StubAdapter { platform: "discord", typing: false });
        registry.register(adapter, &[]).unwrap();
        assert!(registry.get("discord").is_some());
    }

    #[test]
    fn rejects_an_adapter_missing_a_required_capability() {
        let registry = ChannelRegistry::new();
        let adapter = Arc::new(StubAdapter { platform: "telegram", typing: false });
        let err = registry.register(adapter, &["typing"]).unwrap_err();
        assert_eq!(err.code(), "MISSING_CAPABILITIES");
        assert!(registry.get("telegram").is_none());
    }

    #[test]
    fn accepts_an_adapter_that_declares_the_required_capability() {
        let registry = ChannelRegistry::new();
        let adapter = Arc::new(StubAdapter { platform: "slack", typing: true });
        registry.register(adapter, &["typing"]).unwrap();
        assert!(registry.get("slack").is_some());
    }

    #[test]
    fn on_message_default_is_a_harmless_no_op() {
        let adapter = StubAdapter { platform: "noop", typing: false };
        let handler: InboundHandler = Arc::new(|_msg| panic!("should never be invoked"));
        adapter.on_message(handler);
    }
}
