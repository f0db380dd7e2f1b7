#![cfg(unix)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kbot_core::time::now_rfc3339;
use kbot_protocol::checkpoint::Checkpoint;
use kbot_protocol::env as kbot_env;
use tokio::process::Command;
use tokio::sync::{broadcast, Mutex, Notify};
use tracing::{info, warn};

use crate::error::{Result, SupervisorError};
use crate::events::SupervisorEvent;
use crate::ipc::IpcHandler;
use crate::types::RunStatus;
pub use crate::types::SupervisorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Draining,
    Stopped,
}

struct State {
    phase: Phase,
    child_pid: Option<u32>,
    pending_checkpoint: Option<String>,
}

pub struct Supervisor {
    config: SupervisorConfig,
    events_tx: broadcast::Sender<SupervisorEvent>,
    state: Mutex<State>,
    consecutive_failures: AtomicU32,
    child_exited: Notify,
    restart_handshake: Notify,
    restart_handshake_active: std::sync::atomic::AtomicBool,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            config,
            events_tx,
            state: Mutex::new(State {
                phase: Phase::Running,
                child_pid: None,
                pending_checkpoint: None,
            }),
            consecutive_failures: AtomicU32::new(0),
            child_exited: Notify::new(),
            restart_handshake: Notify::new(),
            restart_handshake_active: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events_tx.subscribe()
    }

    pub fn ipc_socket_path(&self) -> PathBuf {
        self.config.base_dir.join("supervisor.sock")
    }

    /// Runs the spawn/respawn loop until the child exits cleanly (code 0,
    /// no pending checkpoint) or shutdown completes. Returns the final
    /// exit code reported by the child, mirroring the documented
    /// "supervisor exits with the most recent child exit code" contract.
    pub async fn run(self: &Arc<Self>) -> Result<i32> {
        loop {
            {
                let state = self.state.lock().await;
                if state.phase != Phase::Running {
                    return Ok(0);
                }
            }

            let checkpoint_path = {
                let mut state = self.state.lock().await;
                state.pending_checkpoint.take()
            };

            let mut child = self.spawn_child(checkpoint_path.as_deref()).await?;
            let pid = child.id().unwrap_or(0);
            {
                let mut state = self.state.lock().await;
                state.child_pid = Some(pid);
            }
            let _ = self.events_tx.send(SupervisorEvent::Spawn { pid });

            self.persist_status(Some(pid), None).await;

            let status = child.wait().await?;
            let code = status.code();
            #[cfg(unix)]
            let signal = std::os::unix::process::ExitStatusExt::signal(&status);
            #[cfg(not(unix))]
            let signal = None;

            {
                let mut state = self.state.lock().await;
                state.child_pid = None;
            }
            self.child_exited.notify_waiters();
            let _ = self.events_tx.send(SupervisorEvent::Exit { code, signal });
            self.persist_status(None, code).await;

            let draining = {
                let state = self.state.lock().await;
                state.phase != Phase::Running
            };
            if draining {
                return Ok(code.unwrap_or(1));
            }

            let has_checkpoint = {
                let state = self.state.lock().await;
                state.pending_checkpoint.is_some()
            };

            if code == Some(0) && !has_checkpoint {
                return Ok(0);
            }

            self.respawn_with_backoff(code).await?;
        }
    }

    async fn respawn_with_backoff(&self, last_code: Option<i32>) -> Result<()> {
        let had_checkpoint = {
            let state = self.state.lock().await;
            state.pending_checkpoint.is_some()
        };
        if !had_checkpoint {
            let checkpoint = Checkpoint::synthesize_crash();
            let path = self.config.base_dir.join("crash-checkpoint.json");
            let _ = checkpoint.save(&path);
            let mut state = self.state.lock().await;
            state.pending_checkpoint = Some(path.to_string_lossy().to_string());
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        let backoff = backoff_delay(failures, self.config.backoff_min_ms, self.config.backoff_max_ms);
        let _ = self.events_tx.send(SupervisorEvent::Respawn { attempt: failures, backoff_ms: backoff.as_millis() as u64 });

        if backoff.as_millis() as u64 >= self.config.backoff_max_ms {
            let _ = self.events_tx.send(SupervisorEvent::Escalation { consecutive_failures: failures });
        }

        warn!(last_code = ?last_code, backoff_ms = backoff.as_millis() as u64, "respawning child");
        tokio::time::sleep(backoff).await;
        Ok(())
    }

    async fn spawn_child(&self, checkpoint_path: Option<&str>) -> Result<tokio::process::Child> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args);
        cmd.env(kbot_env::KBOT_SUPERVISED, "1");
        cmd.env(kbot_env::KBOT_SUPERVISOR_PID, std::process::id().to_string());
        cmd.env(kbot_env::KBOT_IPC_SOCKET, self.ipc_socket_path().to_string_lossy().to_string());
        if let Some(path) = checkpoint_path {
            cmd.env(kbot_env::KBOT_CHECKPOINT_PATH, path);
            cmd.arg(kbot_env::CHECKPOINT_ARGV_FLAG);
            cmd.arg(path);
        }
        cmd.spawn().map_err(|e| SupervisorError::SpawnFailed(e.to_string()))
    }

    async fn persist_status(&self, pid: Option<u32>, last_exit_code: Option<i32>) {
        let status = RunStatus {
            pid,
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
            last_exit_code,
            last_spawn_at: Some(now_rfc3339()),
        };
        if let Err(err) = status.save(&self.config.status_path).await {
            warn!(error = %err, "failed to persist supervisor status sidecar");
        }
    }

    pub async fn is_draining(&self) -> bool {
        self.state.lock().await.phase != Phase::Running
    }

    /// Soft shutdown: drains in-flight restart handshakes, sends SIGTERM,
    /// escalates to SIGKILL after `shutdown_timeout`. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if state.phase != Phase::Running {
                return Ok(());
            }
            state.phase = Phase::Draining;
        }
        let _ = self.events_tx.send(SupervisorEvent::Draining);

        if self.restart_handshake_active.load(Ordering::SeqCst) {
            let wait = self.restart_handshake.notified();
            let _ = tokio::time::timeout(Duration::from_secs(self.config.shutdown_timeout_secs), wait).await;
        }

        let pid = self.state.lock().await.child_pid;
        if let Some(pid) = pid {
            send_signal(pid, libc::SIGTERM);
            let timeout = Duration::from_secs(self.config.shutdown_timeout_secs);
            let wait = self.child_exited.notified();
            if tokio::time::timeout(timeout, wait).await.is_err() {
                if let Some(pid) = self.state.lock().await.child_pid {
                    send_signal(pid, libc::SIGKILL);
                }
            }
        }

        {
            let mut state = self.state.lock().await;
            state.phase = Phase::Stopped;
        }
        let _ = self.events_tx.send(SupervisorEvent::Shutdown);
        Ok(())
    }

    pub async fn hard_shutdown(&self) -> Result<()> {
        let pid = {
            let mut state = self.state.lock().await;
            state.phase = Phase::Stopped;
            state.child_pid
        };
        if let Some(pid) = pid {
            send_signal(pid, libc::SIGKILL);
        }
        let _ = self.events_tx.send(SupervisorEvent::Shutdown);
        Ok(())
    }
}

fn send_signal(pid: u32, signal: i32) {
    unsafe {
        libc::kill(pid as libc::pid_t, signal);
    }
}

fn backoff_delay(attempt: u32, min_ms: u64, max_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    let scaled = (min_ms as u128).saturating_mul(1u128 << exponent);
    Duration::from_millis(scaled.min(max_ms as u128) as u64)
}

#[async_trait]
impl IpcHandler for Supervisor {
    async fn on_planned_restart(&self, checkpoint: &str) -> bool {
        if self.is_draining().await {
            info!(checkpoint, "rejecting planned_restart, supervisor is draining");
            return false;
        }
        self.restart_handshake_active.store(true, Ordering::SeqCst);
        let accessible = tokio::fs::metadata(checkpoint).await.is_ok();
        if accessible {
            let mut state = self.state.lock().await;
            state.pending_checkpoint = Some(checkpoint.to_string());
        }
        self.restart_handshake_active.store(false, Ordering::SeqCst);
        self.restart_handshake.notify_waiters();
        accessible
    }

    async fn on_remote_error(&self, message: &str) {
        info!(message, "child reported ipc error");
    }
}
