//! Resolves the `agent` segment of a [`SessionKey`](crate::SessionKey) to
//! the subprocess config that should serve it.

use std::collections::BTreeMap;

use crate::config::{AgentConfig, KbotConfig};
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, AgentConfig>,
}

impl AgentRegistry {
    pub fn new(agents: BTreeMap<String, AgentConfig>) -> Self {
        Self { agents }
    }

    /// Builds a registry from `config.agents`, registering `config.agent`
    /// under the name `"main"` unless a named entry already overrides it.
    pub fn from_config(config: &KbotConfig) -> Self {
        let mut agents = config.agents.clone();
        agents
            .entry("main".to_string())
            .or_insert_with(|| config.agent.clone());
        Self { agents }
    }

    pub fn resolve(&self, agent: &str) -> Result<&AgentConfig> {
        self.agents
            .get(agent)
            .ok_or_else(|| CoreError::UnknownAgent(agent.to_string()))
    }

    pub fn contains(&self, agent: &str) -> bool {
        self.agents.contains_key(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_registers_the_default_agent_as_main() {
        let config = KbotConfig::default();
        let registry = AgentRegistry::from_config(&config);
        assert!(registry.resolve("main").is_ok());
    }

    #[test]
    fn unknown_agent_is_rejected() {
        let registry = AgentRegistry::default();
        let err = registry.resolve("ghost").unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_AGENT");
    }

    #[test]
    fn named_entry_overrides_the_default_agent_config() {
        let mut config = KbotConfig::default();
        config.agent.command = "default-agent".to_string();
        let mut override_cfg = AgentConfig::default();
        override_cfg.command = "special-agent".to_string();
        config.agents.insert("main".to_string(), override_cfg);

        let registry = AgentRegistry::from_config(&config);
        assert_eq!(registry.resolve("main").unwrap().command, "special-agent");
    }
}
