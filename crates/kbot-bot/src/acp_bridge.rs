//! Bridges the agent subprocess's JSON-RPC framing to the `AcpClient`
//! contract `kbot-lifecycle` drives sessions through.
//!
//! The protocol names the agent only as an opaque JSON-RPC peer (see the
//! framing layer), so the two method names used here — `session/new` and
//! `session/prompt` — are an assumption about the concrete agent wire
//! format rather than something pinned down upstream. Swapping them for a
//! real agent's actual method names is a one-file change.

use std::sync::Arc;

use async_trait::async_trait;
use kbot_framing::{Framing, SendOpts};
use kbot_lifecycle::{AcpClient, LifecycleError, Result as LifecycleResult};
use serde_json::{json, Value};
use tokio::io::AsyncWrite;
use tokio::sync::broadcast;

pub struct FramingAcpClient<W> {
    framing: Arc<Framing<W>>,
    stderr_tx: broadcast::Sender<String>,
}

impl<W> FramingAcpClient<W>
where
    W: AsyncWrite + Unpin + Send + Sync + 'static,
{
    pub fn new(framing: Arc<Framing<W>>, stderr_tx: broadcast::Sender<String>) -> Self {
        Self { framing, stderr_tx }
    }
}

#[async_trait]
impl<W> AcpClient for FramingAcpClient<W>
where
    W: AsyncWrite + Unpin + Send + Sync + 'static,
{
    async fn new_session(&self) -> LifecycleResult<String> {
        let result = self
            .framing
            .send_request("session/new", None, SendOpts::default())
            .await
            .map_err(|e| LifecycleError::Acp(e.to_string()))?;

        result
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| LifecycleError::Acp("session/new response missing sessionId".into()))
    }

    async fn send_usage_prompt(&self, session_id: &str) -> LifecycleResult<()> {
        self.framing
            .send_request(
                "session/prompt",
                Some(json!({ "sessionId": session_id, "prompt": "/usage" })),
                SendOpts::default(),
            )
            .await
            .map_err(|e| LifecycleError::Acp(e.to_string()))?;
        Ok(())
    }

    async fn subscribe_stderr(&self, _session_id: &str) -> broadcast::Receiver<String> {
        self.stderr_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn new_session_extracts_session_id_from_response() {
        let (agent_io, mut harness_io) = duplex(4096);
        let (agent_read, agent_write) = tokio::io::split(agent_io);
        let framing = Arc::new(Framing::new(agent_read, agent_write, Duration::from_secs(5)));
        let (stderr_tx, _) = broadcast::channel(16);
        let client = FramingAcpClient::new(framing, stderr_tx);

        let handle = tokio::spawn(async move { client.new_session().await });

        let mut buf = vec![0u8; 256];
        let n = harness_io.read(&mut buf[..]).await.unwrap();
        let sent = String::from_utf8_lossy(&buf[..n]);
        assert!(sent.contains("\"method\":\"session/new\""));

        harness_io
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"sessionId\":\"acp-1\"}}\n")
            .await
            .unwrap();

        let session_id = handle.await.unwrap().unwrap();
        assert_eq!(session_id, "acp-1");
    }

    #[tokio::test]
    async fn new_session_without_session_id_field_is_an_error() {
        let (agent_io, mut harness_io) = duplex(4096);
        let (agent_read, agent_write) = tokio::io::split(agent_io);
        let framing = Arc::new(Framing::new(agent_read, agent_write, Duration::from_secs(5)));
        let (stderr_tx, _) = broadcast::channel(16);
        let client = FramingAcpClient::new(framing, stderr_tx);

        let handle = tokio::spawn(async move { client.new_session().await });

        let mut buf = vec![0u8; 256];
        harness_io.read(&mut buf[..]).await.unwrap();
        harness_io
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n")
            .await
            .unwrap();

        assert!(handle.await.unwrap().is_err());
    }
}
