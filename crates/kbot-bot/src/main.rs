//! Thin bootstrap for the bot runtime: loads config, spawns the agent
//! subprocess, wires the durable stores and session lifecycle on top of
//! it, and sits on a signal loop. Routing inbound channel traffic through
//! a concrete `ChannelAdapter` is left to the platform-specific adapter
//! this binary doesn't ship.

mod acp_bridge;

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use kbot_conversations::ConversationStore;
use kbot_core::config::KbotConfig;
use kbot_framing::Framing;
use kbot_lifecycle::{ContextUsageTracker, LifecycleConfig, LifecycleEvent, SessionLifecycle, UsageEvent};
use kbot_protocol::checkpoint::{Checkpoint, RestartReason};
use kbot_restart::RestartClient;
use kbot_sessions::SessionStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use acp_bridge::FramingAcpClient;

#[derive(Parser, Debug)]
#[command(name = "kbot-bot")]
struct Args {
    /// Path to the TOML config file; falls back to `KBOT_CONFIG`/`kbot.toml`.
    #[arg(long)]
    config: Option<String>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("KBOT_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = KbotConfig::load(args.config.as_deref()).context("loading config")?;

    tokio::fs::create_dir_all(&config.base_dir)
        .await
        .context("creating base_dir")?;

    log_inherited_checkpoint();

    let sessions = Arc::new(SessionStore::with_lock_timeout(
        &config.base_dir,
        Duration::from_millis(config.lifecycle.lock_timeout_ms),
    ));
    let recovered = sessions
        .recover_orphaned_sessions()
        .await
        .context("recovering orphaned sessions")?;
    if recovered > 0 {
        info!(recovered, "abandoned orphaned sessions left over from a prior run");
    }

    let conversations = Arc::new(ConversationStore::with_sessions(
        &config.base_dir,
        Some(sessions.clone()),
    ));

    let mut child = Command::new(&config.agent.command)
        .args(&config.agent.args)
        .envs(&config.agent.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning agent subprocess '{}'", config.agent.command))?;

    let stdin = child.stdin.take().context("agent subprocess has no stdin")?;
    let stdout = child.stdout.take().context("agent subprocess has no stdout")?;
    let stderr = child.stderr.take().context("agent subprocess has no stderr")?;

    let method_timeouts: HashMap<String, Duration> = config
        .framing
        .method_timeouts
        .iter()
        .map(|(method, ms)| (method.clone(), Duration::from_millis(*ms)))
        .collect();

    let framing = Arc::new(Framing::with_method_timeouts(
        stdout,
        stdin,
        Duration::from_millis(config.framing.default_timeout_ms),
        method_timeouts,
    ));

    let (stderr_tx, _) = broadcast::channel(256);
    tokio::spawn(forward_agent_stderr(stderr, stderr_tx.clone()));

    // The bridge below is the `AcpClient` a `ChannelAdapter` integration
    // drives per inbound message; this binary wires it and waits, since no
    // concrete adapter ships here.
    let _acp_client: Arc<dyn kbot_lifecycle::AcpClient> =
        Arc::new(FramingAcpClient::new(framing.clone(), stderr_tx));

    let lifecycle_config = LifecycleConfig {
        rotation_threshold_pct: config.lifecycle.rotation_threshold_pct,
        recent_conversation_window_secs: config.lifecycle.recent_conversation_window_secs as i64,
    };
    let agents = Arc::new(kbot_core::AgentRegistry::from_config(&config));
    let lifecycle = Arc::new(SessionLifecycle::with_agents(
        conversations.clone(),
        sessions.clone(),
        lifecycle_config,
        agents,
    ));
    let usage_tracker = Arc::new(ContextUsageTracker::new());

    tokio::spawn(log_lifecycle_events(lifecycle.subscribe()));
    tokio::spawn(log_usage_events(usage_tracker.subscribe()));

    let restart_client = Arc::new(RestartClient::from_env());
    if restart_client.is_supervised() {
        info!("planned-restart IPC channel available");
        spawn_planned_restart_handler(restart_client.clone(), config.base_dir.clone());
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
        status = child.wait() => {
            match status {
                Ok(status) => warn!(?status, "agent subprocess exited"),
                Err(err) => error!(error = %err, "failed waiting on agent subprocess"),
            }
        }
    }

    framing.close().await;
    Ok(())
}

fn log_inherited_checkpoint() {
    if !kbot_protocol::env::is_supervised() {
        return;
    }
    info!(pid = std::process::id(), "running under supervision");
    let Some(path) = kbot_protocol::env::checkpoint_path_from_env() else {
        return;
    };
    match Checkpoint::load(Path::new(&path)) {
        Ok(checkpoint) => info!(
            reason = ?checkpoint.restart_reason,
            prompt = ?checkpoint.wake_context.prompt,
            "resumed from inherited checkpoint"
        ),
        Err(err) => warn!(error = %err, path, "failed to load inherited checkpoint"),
    }
}

async fn forward_agent_stderr(stderr: tokio::process::ChildStderr, tx: broadcast::Sender<String>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let _ = tx.send(line);
            }
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "agent stderr read failed");
                break;
            }
        }
    }
}

async fn log_lifecycle_events(mut events: broadcast::Receiver<LifecycleEvent>) {
    while let Ok(event) = events.recv().await {
        match event {
            LifecycleEvent::SessionCreated { session_key, acp_session_id } => {
                info!(session_key, acp_session_id, "session created")
            }
            LifecycleEvent::SessionRecovered { session_key, acp_session_id } => {
                info!(session_key, acp_session_id, "session recovered")
            }
            LifecycleEvent::SessionRotated {
                session_key,
                old_acp_session_id,
                new_acp_session_id,
            } => info!(session_key, old_acp_session_id, new_acp_session_id, "session rotated"),
            LifecycleEvent::SessionEnded { session_key } => info!(session_key, "session ended"),
        }
    }
}

async fn log_usage_events(mut events: broadcast::Receiver<UsageEvent>) {
    while let Ok(event) = events.recv().await {
        match event {
            UsageEvent::Update { session_key, snapshot } => info!(
                session_key,
                percentage = snapshot.percentage,
                model = ?snapshot.model,
                "usage updated"
            ),
            UsageEvent::Error { session_key, message } => {
                warn!(session_key, message, "usage probe failed")
            }
            UsageEvent::Timeout { session_key, ms } => {
                warn!(session_key, ms, "usage probe timed out")
            }
        }
    }
}

/// On SIGHUP, write a planned-restart checkpoint and hand it to the
/// supervisor over IPC. This is the child-side half of the planned-upgrade
/// flow; the supervisor decides whether to honor it.
fn spawn_planned_restart_handler(restart_client: Arc<RestartClient>, base_dir: std::path::PathBuf) {
    #[cfg(unix)]
    tokio::spawn(async move {
        let mut sighup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
            Ok(sig) => sig,
            Err(err) => {
                warn!(error = %err, "failed to install SIGHUP handler");
                return;
            }
        };
        loop {
            sighup.recv().await;
            if restart_client.is_pending() {
                warn!("SIGHUP received while a restart request is already in flight");
                continue;
            }

            let checkpoint = Checkpoint::new(kbot_core::SessionId::new().to_string(), RestartReason::Planned);
            let path = base_dir.join("restart-checkpoint.json");
            if let Err(err) = checkpoint.save(&path) {
                error!(error = %err, "failed to write restart checkpoint");
                continue;
            }

            match restart_client
                .request_restart(&path.to_string_lossy(), None, None)
                .await
            {
                Ok(()) => info!("planned restart acknowledged by supervisor"),
                Err(err) => warn!(error = %err, "planned restart request failed"),
            }
        }
    });

    #[cfg(not(unix))]
    {
        let _ = (restart_client, base_dir);
    }
}
