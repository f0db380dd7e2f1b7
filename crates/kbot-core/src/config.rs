//! Layered configuration: a TOML file merged with `KBOT_`-prefixed
//! environment overrides, following the same `figment` recipe as
//! `skynet-core::config::SkynetConfig`.

use std::path::PathBuf;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const DEFAULT_FRAMING_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_ROTATION_THRESHOLD_PCT: f64 = 70.0;
pub const DEFAULT_RECENT_CONVERSATION_WINDOW_SECS: u64 = 30 * 60;
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_SEND_QUEUE_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BACKOFF_MIN_MS: u64 = 500;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbotConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default)]
    pub agent: AgentConfig,
    /// Additional named agent subprocess configs, keyed by the `agent`
    /// segment of a session key. `agent` above is always registered under
    /// the name `"main"` unless overridden here.
    #[serde(default)]
    pub agents: std::collections::BTreeMap<String, AgentConfig>,
    #[serde(default)]
    pub framing: FramingConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".kbot")
}

impl Default for KbotConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            agent: AgentConfig::default(),
            agents: Default::default(),
            framing: FramingConfig::default(),
            lifecycle: LifecycleConfig::default(),
            channels: ChannelsConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: std::collections::BTreeMap<String, String>,
}

fn default_agent_command() -> String {
    "kbot-agent".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            args: Vec::new(),
            env: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramingConfig {
    #[serde(default = "default_framing_timeout")]
    pub default_timeout_ms: u64,
    #[serde(default)]
    pub method_timeouts: std::collections::BTreeMap<String, u64>,
}

fn default_framing_timeout() -> u64 {
    DEFAULT_FRAMING_TIMEOUT_MS
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_framing_timeout(),
            method_timeouts: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_rotation_threshold")]
    pub rotation_threshold_pct: f64,
    #[serde(default = "default_recent_window")]
    pub recent_conversation_window_secs: u64,
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,
}

fn default_rotation_threshold() -> f64 {
    DEFAULT_ROTATION_THRESHOLD_PCT
}

fn default_recent_window() -> u64 {
    DEFAULT_RECENT_CONVERSATION_WINDOW_SECS
}

fn default_lock_timeout() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            rotation_threshold_pct: default_rotation_threshold(),
            recent_conversation_window_secs: default_recent_window(),
            lock_timeout_ms: default_lock_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_max_reconnect")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_send_queue_attempts")]
    pub send_queue_max_attempts: u32,
}

fn default_health_interval() -> u64 {
    DEFAULT_HEALTH_CHECK_INTERVAL_SECS
}
fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}
fn default_max_reconnect() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}
fn default_send_queue_attempts() -> u32 {
    DEFAULT_SEND_QUEUE_MAX_ATTEMPTS
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_health_interval(),
            failure_threshold: default_failure_threshold(),
            max_reconnect_attempts: default_max_reconnect(),
            send_queue_max_attempts: default_send_queue_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_backoff_min")]
    pub backoff_min_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    #[serde(default = "default_status_path")]
    pub status_path: PathBuf,
}

fn default_backoff_min() -> u64 {
    DEFAULT_BACKOFF_MIN_MS
}
fn default_backoff_max() -> u64 {
    DEFAULT_BACKOFF_MAX_MS
}
fn default_shutdown_timeout() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}
fn default_status_path() -> PathBuf {
    PathBuf::from(".kbot/supervisor-status.json")
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff_min_ms: default_backoff_min(),
            backoff_max_ms: default_backoff_max(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            status_path: default_status_path(),
        }
    }
}

impl KbotConfig {
    /// Load config: explicit path > `KBOT_CONFIG` env > `./kbot.toml`, with
    /// `KBOT_`-prefixed environment variables (double-underscore-split for
    /// nested fields) layered on top.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(PathBuf::from)
            .or_else(|| std::env::var("KBOT_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("kbot.toml"));

        let figment = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("KBOT_").split("__"));

        figment
            .extract()
            .map_err(|e| CoreError::Internal(format!("config load failed: {e}")))
    }
}
