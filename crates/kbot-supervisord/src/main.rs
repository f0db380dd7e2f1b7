use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use kbot_supervisor::{IpcServer, Supervisor, SupervisorConfig, SupervisorEvent};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Forks and supervises the bot child process, handling planned restarts
/// and crash respawn with backoff.
#[derive(Parser, Debug)]
#[command(name = "kbot-supervisord")]
struct Args {
    /// Command to run as the supervised child.
    #[arg(long)]
    command: String,

    /// Arguments passed to the child command.
    #[arg(long = "arg")]
    args: Vec<String>,

    /// Base directory for durable state and the IPC socket.
    #[arg(long, default_value = "./kbot-data")]
    base_dir: PathBuf,
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

    tokio::fs::create_dir_all(&args.base_dir)
        .await
        .context("creating base_dir")?;

    let config = SupervisorConfig {
        command: args.command,
        args: args.args,
        base_dir: args.base_dir.clone(),
        backoff_min_ms: kbot_supervisor::types::DEFAULT_BACKOFF_MIN_MS,
        backoff_max_ms: kbot_supervisor::types::DEFAULT_BACKOFF_MAX_MS,
        shutdown_timeout_secs: kbot_supervisor::types::DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        status_path: args.base_dir.join("supervisor-status.json"),
    };

    let supervisor = Supervisor::new(config);
    let ipc_server = IpcServer::new(supervisor.ipc_socket_path());

    let ipc_supervisor = supervisor.clone();
    let ipc_task = tokio::spawn(async move {
        if let Err(err) = ipc_server.serve(ipc_supervisor).await {
            tracing::warn!(error = %err, "ipc server exited");
        }
    });

    let mut events = supervisor.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            log_event(&event);
        }
    });

    let shutdown_supervisor = supervisor.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, starting graceful shutdown");
            let _ = shutdown_supervisor.shutdown().await;
        }
    });

    let exit_code = supervisor.run().await.context("supervisor run loop")?;
    ipc_task.abort();
    std::process::exit(exit_code);
}

fn log_event(event: &SupervisorEvent) {
    match event {
        SupervisorEvent::Spawn { pid } => info!(pid, "child spawned"),
        SupervisorEvent::Exit { code, signal } => info!(?code, ?signal, "child exited"),
        SupervisorEvent::Respawn { attempt, backoff_ms } => info!(attempt, backoff_ms, "respawning"),
        SupervisorEvent::Escalation { consecutive_failures } => {
            tracing::error!(consecutive_failures, "respawn backoff escalated to cap")
        }
        SupervisorEvent::Draining => info!("draining"),
        SupervisorEvent::Shutdown => info!("shutdown complete"),
        SupervisorEvent::IpcError { message } => tracing::warn!(message, "ipc error"),
    }
}
