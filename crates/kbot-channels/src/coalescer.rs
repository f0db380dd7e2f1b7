//! Streaming output coalescing. A single `Coalescer` type covers both the
//! chunked-delivery and whole-response-on-complete shapes via
//! `CoalescePolicy`, per the "single type with a policy parameter" option.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub enum CoalescePolicy {
    Chunked { min_chars: usize, idle_ms: u64 },
    Buffered,
}

#[async_trait]
pub trait CoalescerSink: Send + Sync {
    async fn on_chunk(&self, chunk: &str);
    async fn on_complete(&self, full_text: &str);
    async fn on_error(&self, err: &str);
}

enum ControlMsg {
    Push(String),
    Flush,
    Complete,
    Abort,
}

/// Chunk delivery is serial: the background task `await`s each `on_chunk`
/// call before pulling the next control message, so callers relying on
/// back-to-back ordered delivery get it for free.
pub struct Coalescer {
    tx: mpsc::UnboundedSender<ControlMsg>,
}

impl Coalescer {
    pub fn new(policy: CoalescePolicy, sink: Arc<dyn CoalescerSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(policy, sink, rx));
        Self { tx }
    }

    pub fn push(&self, text: impl Into<String>) {
        let _ = self.tx.send(ControlMsg::Push(text.into()));
    }

    pub fn flush(&self) {
        let _ = self.tx.send(ControlMsg::Flush);
    }

    pub fn complete(&self) {
        let _ = self.tx.send(ControlMsg::Complete);
    }

    pub fn abort(&self) {
        let _ = self.tx.send(ControlMsg::Abort);
    }
}

async fn run(policy: CoalescePolicy, sink: Arc<dyn CoalescerSink>, mut rx: mpsc::UnboundedReceiver<ControlMsg>) {
    let mut buffer = String::new();
    let mut full_text = String::new();
    let mut done = false;
    let idle_ms = match policy {
        CoalescePolicy::Chunked { idle_ms, .. } => idle_ms,
        CoalescePolicy::Buffered => u64::MAX,
    };

    loop {
        let idle_deadline = if idle_ms == u64::MAX {
            None
        } else {
            Some(Instant::now() + Duration::from_millis(idle_ms))
        };

        let msg = if let Some(deadline) = idle_deadline {
            if buffer.is_empty() {
                rx.recv().await
            } else {
                tokio::select! {
                    msg = rx.recv() => msg,
                    _ = tokio::time::sleep_until(deadline) => {
                        flush_chunk(&sink, &mut buffer).await;
                        continue;
                    }
                }
            }
        } else {
            rx.recv().await
        };

        let Some(msg) = msg else { break };
        if done {
            continue;
        }

        match msg {
            ControlMsg::Push(text) => {
                full_text.push_str(&text);
                match policy {
                    CoalescePolicy::Buffered => {}
                    CoalescePolicy::Chunked { min_chars, .. } => {
                        buffer.push_str(&text);
                        if buffer.chars().count() >= min_chars {
                            flush_chunk(&sink, &mut buffer).await;
                        }
                    }
                }
            }
            ControlMsg::Flush => {
                flush_chunk(&sink, &mut buffer).await;
            }
            ControlMsg::Complete => {
                flush_chunk(&sink, &mut buffer).await;
                sink.on_complete(&full_text).await;
                done = true;
            }
            ControlMsg::Abort => {
                buffer.clear();
                done = true;
            }
        }
    }
}

async fn flush_chunk(sink: &Arc<dyn CoalescerSink>, buffer: &mut String) {
    if buffer.is_empty() {
        return;
    }
    let chunk = std::mem::take(buffer);
    sink.on_chunk(&chunk).await;
}

/// Sink a `UpdateBatcher` flushes applied edits through; errors are logged
/// by the background task and do not stop other queued entries from being
/// processed.
#[async_trait]
pub trait UpdateSink<P>: Send + Sync {
    async fn apply(&self, message_id: &str, payload: P) -> Result<(), String>;
}

/// Keyed-by-message-id update batching for rich-widget edits: coalesces
/// repeated updates to the same message, caps pending entries, debounces
/// the first flush, and rate-limits outbound edits with a token bucket. A
/// background task owns the debounce/refill timing the same way
/// `Coalescer`'s does; callers only ever touch the shared state through
/// `queue_update`.
pub struct UpdateBatcher<P> {
    inner: Arc<Mutex<BatcherState<P>>>,
    notify: Arc<tokio::sync::Notify>,
}

struct BatcherState<P> {
    pending: std::collections::HashMap<String, P>,
    order: Vec<String>,
    max_queue: usize,
    tokens: f64,
    max_tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

pub const DEFAULT_UPDATE_BATCHER_MAX_QUEUE: usize = 50;
pub const DEFAULT_UPDATE_BATCHER_DEBOUNCE_MS: u64 = 200;
pub const DEFAULT_UPDATE_BATCHER_MAX_TOKENS: f64 = 5.0;
pub const DEFAULT_UPDATE_BATCHER_REFILL_PER_SEC: f64 = 1.0;

impl<P: Clone + Send + 'static> UpdateBatcher<P> {
    pub fn new(sink: Arc<dyn UpdateSink<P> + Send + Sync>) -> Self {
        Self::with_debounce(sink, Duration::from_millis(DEFAULT_UPDATE_BATCHER_DEBOUNCE_MS))
    }

    pub fn with_debounce(sink: Arc<dyn UpdateSink<P> + Send + Sync>, debounce: Duration) -> Self {
        let inner = Arc::new(Mutex::new(BatcherState {
            pending: std::collections::HashMap::new(),
            order: Vec::new(),
            max_queue: DEFAULT_UPDATE_BATCHER_MAX_QUEUE,
            tokens: DEFAULT_UPDATE_BATCHER_MAX_TOKENS,
            max_tokens: DEFAULT_UPDATE_BATCHER_MAX_TOKENS,
            refill_per_sec: DEFAULT_UPDATE_BATCHER_REFILL_PER_SEC,
            last_refill: Instant::now(),
        }));
        let notify = Arc::new(tokio::sync::Notify::new());
        tokio::spawn(run_batcher(inner.clone(), notify.clone(), sink, debounce));
        Self { inner, notify }
    }

    /// Replaces any pending entry for `message_id`. New entries past the
    /// queue cap are dropped; updates to an entry already queued always
    /// succeed, since they replace in place rather than growing `order`.
    pub async fn queue_update(&self, message_id: impl Into<String>, payload: P) -> bool {
        let message_id = message_id.into();
        let mut state = self.inner.lock().await;
        let is_new = !state.pending.contains_key(&message_id);
        if is_new && state.order.len() >= state.max_queue {
            return false;
        }
        if is_new {
            state.order.push(message_id.clone());
        }
        state.pending.insert(message_id, payload);
        drop(state);
        self.notify.notify_one();
        true
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.order.len()
    }
}

async fn run_batcher<P: Clone + Send + 'static>(
    inner: Arc<Mutex<BatcherState<P>>>,
    notify: Arc<tokio::sync::Notify>,
    sink: Arc<dyn UpdateSink<P> + Send + Sync>,
    debounce: Duration,
) {
    loop {
        notify.notified().await;
        tokio::time::sleep(debounce).await;
        loop {
            let next = {
                let mut state = inner.lock().await;
                refill(&mut state);
                if state.order.is_empty() {
                    None
                } else if state.tokens < 1.0 {
                    Some(None)
                } else {
                    state.tokens -= 1.0;
                    let id = state.order.remove(0);
                    let payload = state.pending.remove(&id);
                    Some(payload.map(|p| (id, p)))
                }
            };
            match next {
                None => break,
                Some(None) => {
                    tokio::time::sleep(Duration::from_secs_f64(1.0 / DEFAULT_UPDATE_BATCHER_REFILL_PER_SEC)).await;
                }
                Some(Some((id, payload))) => {
                    if let Err(err) = sink.apply(&id, payload).await {
                        tracing::warn!(message_id = %id, error = %err, "update batcher apply failed");
                    }
                }
            }
        }
    }
}

fn refill<P>(state: &mut BatcherState<P>) {
    let now = Instant::now();
    let elapsed = now.duration_since(state.last_refill).as_secs_f64();
    state.tokens = (state.tokens + elapsed * state.refill_per_sec).min(state.max_tokens);
    state.last_refill = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex as TokioMutex;

    struct RecordingSink {
        chunks: TokioMutex<Vec<String>>,
        completed: TokioMutex<Option<String>>,
    }

    #[async_trait::async_trait]
    impl CoalescerSink for RecordingSink {
        async fn on_chunk(&self, chunk: &str) {
            self.chunks.lock().await.push(chunk.to_string());
        }
        async fn on_complete(&self, full_text: &str) {
            *self.completed.lock().await = Some(full_text.to_string());
        }
        async fn on_error(&self, _err: &str) {}
    }

    #[tokio::test]
    async fn chunked_flushes_at_min_chars() {
        let sink = Arc::new(RecordingSink {
            chunks: TokioMutex::new(Vec::new()),
            completed: TokioMutex::new(None),
        });
        let coalescer = Coalescer::new(CoalescePolicy::Chunked { min_chars: 5, idle_ms: 10_000 }, sink.clone());
        coalescer.push("hello world");
        coalescer.complete();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sink.chunks.lock().await.is_empty());
        assert_eq!(sink.completed.lock().await.as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn buffered_sends_once_on_complete() {
        let sink = Arc::new(RecordingSink {
            chunks: TokioMutex::new(Vec::new()),
            completed: TokioMutex::new(None),
        });
        let coalescer = Coalescer::new(CoalescePolicy::Buffered, sink.clone());
        coalescer.push("a");
        coalescer.push("b");
        coalescer.complete();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sink.chunks.lock().await.is_empty());
        assert_eq!(sink.completed.lock().await.as_deref(), Some("ab"));
    }

    #[tokio::test]
    async fn abort_never_calls_on_complete() {
        let sink = Arc::new(RecordingSink {
            chunks: TokioMutex::new(Vec::new()),
            completed: TokioMutex::new(None),
        });
        let coalescer = Coalescer::new(CoalescePolicy::Buffered, sink.clone());
        coalescer.push("a");
        coalescer.abort();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sink.completed.lock().await.is_none());
    }

    struct RecordingUpdateSink {
        applied: Arc<TokioMutex<Vec<(String, u32)>>>,
    }

    #[async_trait::async_trait]
    impl UpdateSink<u32> for RecordingUpdateSink {
        async fn apply(&self, message_id: &str, payload: u32) -> Result<(), String> {
            self.applied.lock().await.push((message_id.to_string(), payload));
            Ok(())
        }
    }

    #[tokio::test]
    async fn update_batcher_coalesces_same_message_id() {
        let applied = Arc::new(TokioMutex::new(Vec::new()));
        let sink = Arc::new(RecordingUpdateSink { applied: applied.clone() });
        let batcher: UpdateBatcher<u32> = UpdateBatcher::with_debounce(sink, Duration::from_millis(10));
        batcher.queue_update("m1", 1).await;
        batcher.queue_update("m1", 2).await;
        assert_eq!(batcher.pending_count().await, 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let applied = applied.lock().await;
        assert_eq!(applied.as_slice(), &[("m1".to_string(), 2)]);
    }

    #[tokio::test]
    async fn update_batcher_rejects_new_entries_past_cap() {
        let applied = Arc::new(TokioMutex::new(Vec::new()));
        let sink = Arc::new(RecordingUpdateSink { applied });
        // A debounce longer than the test keeps the background task from
        // draining the queue before the cap assertions below run.
        let batcher: UpdateBatcher<u32> = UpdateBatcher::with_debounce(sink, Duration::from_secs(60));
        for i in 0..DEFAULT_UPDATE_BATCHER_MAX_QUEUE {
            assert!(batcher.queue_update(format!("m{i}"), i as u32).await);
        }
        assert!(!batcher.queue_update("overflow", 0).await);
        assert!(batcher.queue_update("m0", 99).await);
    }
}
