//! The parent side of the control channel: a newline-delimited JSON
//! stream over a Unix domain socket, kept entirely separate from the
//! child's stdio (which carries the JSON-RPC conversation with the
//! agent).

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use kbot_protocol::ipc::IpcMessage;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing::{debug, warn};

#[async_trait]
pub trait IpcHandler: Send + Sync {
    /// Returns true to ack the restart and remember the checkpoint.
    async fn on_planned_restart(&self, checkpoint: &str) -> bool;
    async fn on_remote_error(&self, message: &str);
}

pub struct IpcServer {
    socket_path: PathBuf,
}

impl IpcServer {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self { socket_path: socket_path.into() }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub async fn serve(&self, handler: Arc<dyn IpcHandler>) -> std::io::Result<()> {
        if self.socket_path.exists() {
            let _ = tokio::fs::remove_file(&self.socket_path).await;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        loop {
            let (stream, _) = listener.accept().await?;
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, handler).await {
                    debug!(error = %err, "ipc connection closed");
                }
            });
        }
    }
}

async fn handle_connection(
    stream: tokio::net::UnixStream,
    handler: Arc<dyn IpcHandler>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<IpcMessage>(trimmed) {
            Ok(IpcMessage::PlannedRestart { checkpoint }) => {
                let ack = handler.on_planned_restart(&checkpoint).await;
                let reply = if ack {
                    IpcMessage::RestartAck
                } else {
                    IpcMessage::Error { message: format!("checkpoint not accessible: {checkpoint}") }
                };
                write_line(&mut write_half, &reply).await?;
            }
            Ok(IpcMessage::Error { message }) => {
                handler.on_remote_error(&message).await;
            }
            Ok(IpcMessage::RestartAck) => {
                warn!("unexpected restart_ack received on parent side, ignoring");
            }
            Err(err) => {
                warn!(error = %err, line = trimmed, "ignoring structurally invalid ipc message");
            }
        }
    }
    Ok(())
}

async fn write_line(
    half: &mut tokio::net::unix::OwnedWriteHalf,
    message: &IpcMessage,
) -> std::io::Result<()> {
    let mut line = serde_json::to_string(message).unwrap_or_default();
    line.push('\n');
    half.write_all(line.as_bytes()).await
}
