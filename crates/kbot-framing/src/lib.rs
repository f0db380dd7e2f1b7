//! Line-delimited JSON-RPC 2.0 transport over a pair of byte streams.
//!
//! Grounded on the `tokio::select!`-driven read/dispatch/timeout event loop
//! in `skynet_gateway::ws::connection` (there built around a websocket
//! frame, here around a newline-delimited stdio pair), and on the
//! `client.request()/notify()/respond()` API shape of the `par-term-acp`
//! `JsonRpcClient` used to drive an agent subprocess over stdio.

pub mod error;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use kbot_protocol::frames::{
    Classified, RawMessage, RpcErrorObject, RpcId, RpcNotification, RpcRequest, RpcResponse,
    INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

pub use error::{FramingError, Result};

#[derive(Debug, Clone)]
pub enum FramingEvent {
    Request {
        id: RpcId,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    /// A response/error that arrived with no matching pending request.
    UnmatchedResponse {
        id: RpcId,
        result: Option<Value>,
        error: Option<RpcErrorObject>,
    },
    Error {
        message: String,
    },
    Closed,
}

#[derive(Debug, Clone, Default)]
pub struct SendOpts {
    pub timeout_ms: Option<u64>,
    /// Suppresses the warning log for a method-not-found rejection; the
    /// call still rejects.
    pub silent: bool,
}

struct PendingEntry {
    tx: oneshot::Sender<std::result::Result<Value, RpcErrorObject>>,
    reaper: JoinHandle<()>,
    silent: bool,
}

struct Inner<W> {
    writer: Mutex<W>,
    next_id: AtomicI64,
    pending: DashMap<RpcId, PendingEntry>,
    events_tx: broadcast::Sender<FramingEvent>,
    closed: AtomicBool,
    activity: watch::Sender<Instant>,
    default_timeout: Duration,
    method_timeouts: HashMap<String, Duration>,
}

/// A live JSON-RPC 2.0 connection over `in`/`out` byte streams.
///
/// `R` is read to completion by a background task spawned in [`Framing::new`];
/// `W` is written to directly from the public `send_*` methods (serialized
/// by an internal mutex, since JSON-RPC lines must not interleave).
pub struct Framing<W> {
    inner: Arc<Inner<W>>,
    reader_task: JoinHandle<()>,
}

impl<W> Framing<W>
where
    W: AsyncWrite + Unpin + Send + Sync + 'static,
{
    pub fn new<R>(input: R, output: W, default_timeout: Duration) -> Self
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        Self::with_method_timeouts(input, output, default_timeout, HashMap::new())
    }

    pub fn with_method_timeouts<R>(
        input: R,
        output: W,
        default_timeout: Duration,
        method_timeouts: HashMap<String, Duration>,
    ) -> Self
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let (events_tx, _) = broadcast::channel(256);
        let (activity, _) = watch::channel(Instant::now());

        let inner = Arc::new(Inner {
            writer: Mutex::new(output),
            next_id: AtomicI64::new(0),
            pending: DashMap::new(),
            events_tx,
            closed: AtomicBool::new(false),
            activity,
            default_timeout,
            method_timeouts,
        });

        let reader_task = tokio::spawn(read_loop(inner.clone(), input));

        Self { inner, reader_task }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FramingEvent> {
        self.inner.events_tx.subscribe()
    }

    fn timeout_for(&self, method: &str, opts: &SendOpts) -> Duration {
        if let Some(ms) = opts.timeout_ms {
            return Duration::from_millis(ms);
        }
        self.inner
            .method_timeouts
            .get(method)
            .copied()
            .unwrap_or(self.inner.default_timeout)
    }

    /// Assigns a monotonically increasing positive id, writes the request,
    /// and resolves on the matching response (or rejects on timeout/close).
    #[instrument(skip(self, params), fields(method = %method))]
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        opts: SendOpts,
    ) -> Result<Value> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(FramingError::Closed);
        }

        let id = RpcId::Number(self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let timeout = self.timeout_for(method, &opts);
        let req = RpcRequest::new(id.clone(), method, params);
        let line = serde_json::to_string(&req).map_err(|e| FramingError::Io(e.into()))?;

        let (tx, rx) = oneshot::channel();
        let reaper = spawn_reaper(self.inner.clone(), id.clone(), timeout);
        self.inner.pending.insert(
            id.clone(),
            PendingEntry {
                tx,
                reaper,
                silent: opts.silent,
            },
        );

        self.write_line(&line).await?;

        match rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(FramingError::Remote(err)),
            Err(_) => Err(FramingError::Closed),
        }
    }

    /// Fire-and-forget; never matched to a response.
    #[instrument(skip(self, params), fields(method = %method))]
    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        let note = RpcNotification::new(method, params);
        let line = serde_json::to_string(&note).map_err(|e| FramingError::Io(e.into()))?;
        self.write_line(&line).await
    }

    pub async fn send_response(&self, id: RpcId, result: Value) -> Result<()> {
        let res = RpcResponse::ok(id, result);
        let line = serde_json::to_string(&res).map_err(|e| FramingError::Io(e.into()))?;
        self.write_line(&line).await
    }

    pub async fn send_error(&self, id: Option<RpcId>, error: RpcErrorObject) -> Result<()> {
        let res = RpcResponse::err(id, error);
        let line = serde_json::to_string(&res).map_err(|e| FramingError::Io(e.into()))?;
        self.write_line(&line).await
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let mut w = self.inner.writer.lock().await;
        w.write_all(line.as_bytes()).await?;
        w.write_all(b"\n").await?;
        w.flush().await?;
        Ok(())
    }

    /// Idempotent. Rejects every still-pending request with a closed error.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.reader_task.abort();
        reject_all_pending(&self.inner);
        let _ = self.inner.events_tx.send(FramingEvent::Closed);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

fn reject_all_pending<W>(inner: &Inner<W>) {
    let ids: Vec<RpcId> = inner.pending.iter().map(|e| e.key().clone()).collect();
    for id in ids {
        if let Some((_, entry)) = inner.pending.remove(&id) {
            entry.reaper.abort();
            let _ = entry.tx.send(Err(RpcErrorObject::new(-1, "transport closed")));
        }
    }
}

fn spawn_reaper<W: Send + Sync + 'static>(
    inner: Arc<Inner<W>>,
    id: RpcId,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut activity_rx = inner.activity.subscribe();
        let mut deadline = Instant::now() + timeout;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    if let Some((_, entry)) = inner.pending.remove(&id) {
                        let _ = entry.tx.send(Err(RpcErrorObject::new(
                            -2,
                            format!("timed out after {}ms", timeout.as_millis()),
                        )));
                    }
                    return;
                }
                changed = activity_rx.changed() => {
                    if changed.is_err() {
                        continue;
                    }
                    let last_activity = *activity_rx.borrow();
                    deadline = last_activity + timeout;
                }
            }
        }
    })
}

async fn read_loop<W, R>(inner: Arc<Inner<W>>, input: R)
where
    W: AsyncWrite + Unpin + Send + Sync + 'static,
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(input);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                // EOF.
                break;
            }
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\n', '\r']);
                if trimmed.is_empty() {
                    continue;
                }
                handle_line(&inner, trimmed).await;
            }
            Err(e) => {
                let _ = inner.events_tx.send(FramingEvent::Error {
                    message: e.to_string(),
                });
                break;
            }
        }
        if inner.closed.load(Ordering::SeqCst) {
            break;
        }
    }

    if !inner.closed.swap(true, Ordering::SeqCst) {
        reject_all_pending(&inner);
        let _ = inner.events_tx.send(FramingEvent::Closed);
    }
}

async fn handle_line<W>(inner: &Arc<Inner<W>>, line: &str)
where
    W: AsyncWrite + Unpin + Send + Sync + 'static,
{
    let raw: RawMessage = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "framing: parse error");
            write_protocol_error(inner, None, PARSE_ERROR, "Parse error").await;
            return;
        }
    };

    match raw.classify() {
        Classified::Request { id, method, params } => {
            bump_activity(inner);
            let _ = inner.events_tx.send(FramingEvent::Request {
                id,
                method,
                params,
            });
        }
        Classified::Notification { method, params } => {
            bump_activity(inner);
            let _ = inner
                .events_tx
                .send(FramingEvent::Notification { method, params });
        }
        Classified::Response { id, result, error } => {
            if let Some((_, entry)) = inner.pending.remove(&id) {
                entry.reaper.abort();
                if let Some(err) = error {
                    if err.code == METHOD_NOT_FOUND && entry.silent {
                        // suppressed per caller request; still rejects below
                    } else if err.code == METHOD_NOT_FOUND {
                        warn!(code = err.code, "framing: method not found");
                    }
                    let _ = entry.tx.send(Err(err));
                } else {
                    let _ = entry.tx.send(Ok(result.unwrap_or(Value::Null)));
                }
            } else {
                let _ = inner.events_tx.send(FramingEvent::UnmatchedResponse {
                    id,
                    result,
                    error,
                });
            }
        }
        Classified::Invalid { id } => {
            write_protocol_error(inner, id, INVALID_REQUEST, "Invalid Request").await;
        }
    }
}

fn bump_activity<W>(inner: &Arc<Inner<W>>) {
    let _ = inner.activity.send(Instant::now());
}

async fn write_protocol_error<W>(
    inner: &Arc<Inner<W>>,
    id: Option<RpcId>,
    code: i64,
    message: &str,
) where
    W: AsyncWrite + Unpin + Send + Sync + 'static,
{
    let res = RpcResponse::err(id, RpcErrorObject::new(code, message));
    if let Ok(line) = serde_json::to_string(&res) {
        let mut w = inner.writer.lock().await;
        let _ = w.write_all(line.as_bytes()).await;
        let _ = w.write_all(b"\n").await;
        let _ = w.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn send_request_resolves_on_matching_response() {
        let (client_io, mut agent_io) = duplex(4096);
        let (agent_read, client_write) = tokio::io::split(client_io);
        let framing = Framing::new(agent_read, client_write, Duration::from_secs(5));

        let handle = tokio::spawn(async move {
            framing
                .send_request("ping", None, SendOpts::default())
                .await
        });

        let mut buf = vec![0u8; 256];
        let n = agent_io.read(&mut buf[..]).await.unwrap();
        let sent = String::from_utf8_lossy(&buf[..n]);
        assert!(sent.contains("\"method\":\"ping\""));

        agent_io
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":\"pong\"}\n")
            .await
            .unwrap();

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result, Value::String("pong".to_string()));
    }

    #[tokio::test]
    async fn ids_start_at_one_and_increase() {
        let (client_io, mut agent_io) = duplex(8192);
        let (agent_read, client_write) = tokio::io::split(client_io);
        let framing = Arc::new(Framing::new(agent_read, client_write, Duration::from_secs(5)));

        let f1 = framing.clone();
        let f2 = framing.clone();
        let h1 = tokio::spawn(async move { f1.send_request("a", None, SendOpts::default()).await });
        let h2 = tokio::spawn(async move { f2.send_request("b", None, SendOpts::default()).await });

        let mut buf = vec![0u8; 4096];
        let n = agent_io.read(&mut buf[..]).await.unwrap();
        let sent = String::from_utf8_lossy(&buf[..n]);
        assert!(sent.contains("\"id\":1"));
        assert!(sent.contains("\"id\":2"));

        agent_io
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":1}\n{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":2}\n")
            .await
            .unwrap();

        h1.await.unwrap().unwrap();
        h2.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn split_chunks_still_parse_as_one_request() {
        let (client_io, mut agent_io) = duplex(4096);
        let (agent_read, client_write) = tokio::io::split(client_io);
        let framing = Framing::new(agent_read, client_write, Duration::from_secs(5));
        let mut events = framing.subscribe();

        agent_io.write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        agent_io.write_all(b",\"method\":\"test\"}\n").await.unwrap();

        let ev = events.recv().await.unwrap();
        match ev {
            FramingEvent::Request { method, .. } => assert_eq!(method, "test"),
            other => panic!("expected Request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_times_out_without_response() {
        let (client_io, _agent_io) = duplex(4096);
        let (agent_read, client_write) = tokio::io::split(client_io);
        let framing = Framing::new(agent_read, client_write, Duration::from_millis(20));

        let result = framing
            .send_request("slow", None, SendOpts::default())
            .await;
        assert!(matches!(result, Err(FramingError::Remote(_))));
    }

    #[tokio::test]
    async fn close_rejects_pending_requests() {
        let (client_io, _agent_io) = duplex(4096);
        let (agent_read, client_write) = tokio::io::split(client_io);
        let framing = Arc::new(Framing::new(agent_read, client_write, Duration::from_secs(30)));

        let f = framing.clone();
        let handle = tokio::spawn(async move { f.send_request("never", None, SendOpts::default()).await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        framing.close().await;

        let result = handle.await.unwrap();
        assert!(result.is_err());
        // idempotent
        framing.close().await;
    }
}
