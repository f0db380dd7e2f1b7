//! Normalizes platform-specific payloads into a common shape and back,
//! so the rest of the runtime never has to know which channel a message
//! came from.

use std::collections::HashMap;

use kbot_core::{CoreError, Result};
use serde_json::Value;

/// A platform message reduced to the fields the runtime actually needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    pub platform: String,
    pub sender_id: String,
    pub text: String,
}

/// Converts one platform's wire payload to and from [`NormalizedMessage`].
/// `normalize`/`denormalize` are expected to round-trip: denormalizing a
/// message normalized from `raw` should reproduce `raw`'s text, sender id,
/// and platform.
pub trait MessageTransformer: Send + Sync {
    fn platform(&self) -> &str;
    fn normalize(&self, raw: &Value) -> Result<NormalizedMessage>;
    fn denormalize(&self, message: &NormalizedMessage) -> Result<Value>;
}

/// Looks up the transformer registered for a message's platform. Plain
/// `HashMap` under a single owner is enough here — registration happens
/// once at startup, unlike the lifecycle's per-key `DashMap` tables.
#[derive(Default)]
pub struct TransformerRegistry {
    transformers: HashMap<String, Box<dyn MessageTransformer>>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, transformer: Box<dyn MessageTransformer>) {
        self.transformers.insert(transformer.platform().to_string(), transformer);
    }

    pub fn normalize(&self, platform: &str, raw: &Value) -> Result<NormalizedMessage> {
        self.transformer(platform)?.normalize(raw)
    }

    pub fn denormalize(&self, message: &NormalizedMessage) -> Result<Value> {
        self.transformer(&message.platform)?.denormalize(message)
    }

    fn transformer(&self, platform: &str) -> Result<&dyn MessageTransformer> {
        self.transformers
            .get(platform)
            .map(|boxed| boxed.as_ref())
            .ok_or_else(|| CoreError::MissingTransformer(platform.to_string()))
    }
}

/// Transforms the `{"type": "text", "sender_id": ..., "text": ...}` shape
/// most chat platforms boil down to. Anything with a different `type`
/// is rejected rather than silently dropped.
pub struct JsonTextTransformer {
    platform: String,
}

impl JsonTextTransformer {
    pub fn new(platform: impl Into<String>) -> Self {
        Self { platform: platform.into() }
    }
}

impl MessageTransformer for JsonTextTransformer {
    fn platform(&self) -> &str {
        &self.platform
    }

    fn normalize(&self, raw: &Value) -> Result<NormalizedMessage> {
        let msg_type = raw.get("type").and_then(Value::as_str).unwrap_or("text");
        if msg_type != "text" {
            return Err(CoreError::UnsupportedType(msg_type.to_string()));
        }
        let text = raw
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::validation("text", "missing or not a string"))?
            .to_string();
        let sender_id = raw
            .get("sender_id")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::validation("sender_id", "missing or not a string"))?
            .to_string();
        Ok(NormalizedMessage {
            platform: self.platform.clone(),
            sender_id,
            text,
        })
    }

    fn denormalize(&self, message: &NormalizedMessage) -> Result<Value> {
        Ok(serde_json::json!({
            "type": "text",
            "sender_id": message.sender_id,
            "text": message.text,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_then_denormalize_preserves_text_sender_and_platform() {
        let transformer = JsonTextTransformer::new("discord");
        let raw = json!({"type": "text", "sender_id": "u1", "text": "hello"});

        let normalized = transformer.normalize(&raw).unwrap();
        assert_eq!(normalized.platform, "discord");
        assert_eq!(normalized.sender_id, "u1");
        assert_eq!(normalized.text, "hello");

        let back = transformer.denormalize(&normalized).unwrap();
        assert_eq!(back["sender_id"], "u1");
        assert_eq!(back["text"], "hello");
    }

    #[test]
    fn normalize_rejects_a_non_text_message_type() {
        let transformer = JsonTextTransformer::new("discord");
        let raw = json!({"type": "sticker", "sender_id": "u1", "sticker_id": "42"});

        let err = transformer.normalize(&raw).unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_TYPE");
    }

    #[test]
    fn registry_rejects_an_unregistered_platform() {
        let registry = TransformerRegistry::new();
        let err = registry.normalize("telegram", &json!({})).unwrap_err();
        assert_eq!(err.code(), "MISSING_TRANSFORMER");
    }

    #[test]
    fn registry_round_trips_through_the_registered_transformer() {
        let mut registry = TransformerRegistry::new();
        registry.register(Box::new(JsonTextTransformer::new("discord")));

        let raw = json!({"type": "text", "sender_id": "u2", "text": "hi there"});
        let normalized = registry.normalize("discord", &raw).unwrap();
        let back = registry.denormalize(&normalized).unwrap();

        assert_eq!(back["text"], "hi there");
        assert_eq!(back["sender_id"], "u2");
    }
}
