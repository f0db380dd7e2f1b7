#![cfg(unix)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use kbot_protocol::env as kbot_env;
use kbot_protocol::ipc::IpcMessage;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::warn;

use crate::error::{RestartError, Result};

pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_RETRIES: u32 = 1;

pub struct RestartClient {
    socket_path: Option<PathBuf>,
    pending: AtomicBool,
}

impl Default for RestartClient {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RestartClient {
    pub fn from_env() -> Self {
        Self {
            socket_path: kbot_env::ipc_socket_from_env().map(PathBuf::from),
            pending: AtomicBool::new(false),
        }
    }

    pub fn is_supervised(&self) -> bool {
        kbot_env::is_supervised()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    pub async fn request_restart(
        &self,
        checkpoint_path: &str,
        timeout_ms: Option<u64>,
        max_retries: Option<u32>,
    ) -> Result<()> {
        let socket_path = self.socket_path.clone().ok_or(RestartError::NoIpcChannel)?;

        if self.pending.swap(true, Ordering::SeqCst) {
            return Err(RestartError::RestartPending);
        }

        let result = self
            .send_with_retry(
                &socket_path,
                checkpoint_path,
                Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_ACK_TIMEOUT_MS)),
                max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            )
            .await;

        self.pending.store(false, Ordering::SeqCst);
        result
    }

    async fn send_with_retry(
        &self,
        socket_path: &PathBuf,
        checkpoint_path: &str,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            match self.send_once(socket_path, checkpoint_path, timeout).await {
                Ok(()) => return Ok(()),
                Err(RestartError::AckTimeout { .. }) if attempt < max_retries => {
                    attempt += 1;
                    warn!(attempt, "restart ack timed out, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_once(&self, socket_path: &PathBuf, checkpoint_path: &str, timeout: Duration) -> Result<()> {
        let stream = UnixStream::connect(socket_path).await?;
        let (read_half, mut write_half) = stream.into_split();

        let mut line = serde_json::to_string(&IpcMessage::PlannedRestart {
            checkpoint: checkpoint_path.to_string(),
        })
        .unwrap_or_default();
        line.push('\n');
        write_half.write_all(line.as_bytes()).await?;

        let mut lines = BufReader::new(read_half).lines();
        let next_line = tokio::time::timeout(timeout, lines.next_line());

        match next_line.await {
            Ok(Ok(Some(raw))) => match serde_json::from_str::<IpcMessage>(raw.trim()) {
                Ok(IpcMessage::RestartAck) => Ok(()),
                Ok(IpcMessage::Error { message }) => {
                    warn!(message, "planned restart rejected by supervisor");
                    Err(RestartError::Io(std::io::Error::new(std::io::ErrorKind::Other, message)))
                }
                _ => Err(RestartError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "unexpected ipc reply shape",
                ))),
            },
            Ok(Ok(None)) => Err(RestartError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "ipc connection closed before ack",
            ))),
            Ok(Err(err)) => Err(RestartError::Io(err)),
            Err(_) => Err(RestartError::AckTimeout { ms: timeout.as_millis() as u64 }),
        }
    }
}
