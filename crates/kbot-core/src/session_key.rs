//! The session key is the routing identity that maps an inbound channel
//! message to a durable conversation: `agent:<agent>:<platform>:<peer-kind>:<peer-id>`.
//!
//! Case-sensitive by design — do not normalize casing without a migration
//! plan, since it is both the conversation-identity key and the recovery
//! lookup key.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionKey {
    pub agent: String,
    pub platform: String,
    pub peer_kind: String,
    pub peer_id: String,
}

const PREFIX: &str = "agent:";

impl SessionKey {
    pub fn new(
        agent: impl Into<String>,
        platform: impl Into<String>,
        peer_kind: impl Into<String>,
        peer_id: impl Into<String>,
    ) -> Self {
        Self {
            agent: agent.into(),
            platform: platform.into(),
            peer_kind: peer_kind.into(),
            peer_id: peer_id.into(),
        }
    }

    pub fn format(&self) -> String {
        format!(
            "agent:{}:{}:{}:{}",
            self.agent, self.platform, self.peer_kind, self.peer_id
        )
    }

    /// Parse `agent:<agent>:<platform>:<peer-kind>:<peer-id>`.
    ///
    /// Only `peer_id` may itself contain `:` — it is everything after the
    /// third segment marker, taken verbatim.
    pub fn parse(s: &str) -> Result<Self> {
        let rest = s.strip_prefix(PREFIX).ok_or_else(|| {
            CoreError::validation("session_key", format!("missing 'agent:' prefix in '{s}'"))
        })?;

        let mut parts = rest.splitn(4, ':');
        let agent = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| CoreError::validation("session_key", "missing agent segment"))?;
        let platform = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| CoreError::validation("session_key", "missing platform segment"))?;
        let peer_kind = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| CoreError::validation("session_key", "missing peer-kind segment"))?;
        let peer_id = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| CoreError::validation("session_key", "missing peer-id segment"))?;

        Ok(Self {
            agent: agent.to_string(),
            platform: platform.to_string(),
            peer_kind: peer_kind.to_string(),
            peer_id: peer_id.to_string(),
        })
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

impl TryFrom<String> for SessionKey {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<SessionKey> for String {
    fn from(key: SessionKey) -> Self {
        key.format()
    }
}
