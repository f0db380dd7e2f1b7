//! Adapter-agnostic connection state machine plus a FIFO send queue. The
//! state machine and its health-check/backoff loop are adapted from the
//! gateway-connection lifecycle pattern (connect → healthy ↔ unhealthy →
//! disconnect), generalized so any `ChannelAdapter` can drive it.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, Notify};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::adapter::ChannelAdapter;
use crate::error::{ChannelError, Result};

pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_SEND_QUEUE_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BACKOFF_MIN_MS: u64 = 500;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    Idle = 0,
    Starting = 1,
    Healthy = 2,
    Unhealthy = 3,
    Stopping = 4,
}

impl ChannelState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ChannelState::Starting,
            2 => ChannelState::Healthy,
            3 => ChannelState::Unhealthy,
            4 => ChannelState::Stopping,
            _ => ChannelState::Idle,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ChannelLifecycleEvent {
    Starting,
    Healthy,
    Unhealthy { consecutive_failures: u32 },
    Reconnecting { attempt: u32 },
    Stopped,
    SendFailed { target: String, attempts: u32, reason: String },
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelLifecycleConfig {
    pub health_check_interval: Duration,
    pub failure_threshold: u32,
    pub max_reconnect_attempts: u32,
    pub send_queue_max_attempts: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for ChannelLifecycleConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(DEFAULT_HEALTH_CHECK_INTERVAL_SECS),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            send_queue_max_attempts: DEFAULT_SEND_QUEUE_MAX_ATTEMPTS,
            backoff_min: Duration::from_millis(DEFAULT_BACKOFF_MIN_MS),
            backoff_max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

struct QueuedSend {
    target: String,
    payload: Value,
    reply: oneshot::Sender<Result<()>>,
}

pub struct ChannelLifecycle {
    adapter: Arc<dyn ChannelAdapter>,
    config: ChannelLifecycleConfig,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    events_tx: broadcast::Sender<ChannelLifecycleEvent>,
    queue_tx: Mutex<Option<mpsc::UnboundedSender<QueuedSend>>>,
    drained: Arc<Notify>,
    inflight: Arc<AtomicU32>,
}

impl ChannelLifecycle {
    pub fn new(adapter: Arc<dyn ChannelAdapter>) -> Self {
        Self::with_config(adapter, ChannelLifecycleConfig::default())
    }

    pub fn with_config(adapter: Arc<dyn ChannelAdapter>, config: ChannelLifecycleConfig) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            adapter,
            config,
            state: AtomicU8::new(ChannelState::Idle as u8),
            consecutive_failures: AtomicU32::new(0),
            events_tx,
            queue_tx: Mutex::new(None),
            drained: Arc::new(Notify::new()),
            inflight: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelLifecycleEvent> {
        self.events_tx.subscribe()
    }

    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ChannelState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn can_accept_messages(&self) -> bool {
        !matches!(self.state(), ChannelState::Stopping | ChannelState::Idle)
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.state() != ChannelState::Idle {
            return Ok(());
        }
        self.set_state(ChannelState::Starting);
        let _ = self.events_tx.send(ChannelLifecycleEvent::Starting);

        if let Err(err) = self.adapter.connect().await {
            self.set_state(ChannelState::Idle);
            return Err(err);
        }

        self.set_state(ChannelState::Healthy);
        self.consecutive_failures.store(0, Ordering::SeqCst);
        let _ = self.events_tx.send(ChannelLifecycleEvent::Healthy);

        let (tx, rx) = mpsc::unbounded_channel();
        *self.queue_tx.lock().await = Some(tx);
        self.spawn_worker(rx);
        self.spawn_health_check();
        Ok(())
    }

    fn spawn_health_check(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                sleep(this.config.health_check_interval).await;
                if matches!(this.state(), ChannelState::Idle | ChannelState::Stopping) {
                    break;
                }
                match this.adapter.health_check().await {
                    Ok(()) => {
                        if this.state() == ChannelState::Unhealthy {
                            this.set_state(ChannelState::Healthy);
                            this.consecutive_failures.store(0, Ordering::SeqCst);
                            let _ = this.events_tx.send(ChannelLifecycleEvent::Healthy);
                        }
                    }
                    Err(_) => this.on_health_check_failure().await,
                }
            }
        });
    }

    async fn on_health_check_failure(self: &Arc<Self>) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures < self.config.failure_threshold {
            return;
        }
        self.set_state(ChannelState::Unhealthy);
        let _ = self
            .events_tx
            .send(ChannelLifecycleEvent::Unhealthy { consecutive_failures: failures });

        for attempt in 1..=self.config.max_reconnect_attempts {
            if matches!(self.state(), ChannelState::Idle | ChannelState::Stopping) {
                return;
            }
            let _ = self
                .events_tx
                .send(ChannelLifecycleEvent::Reconnecting { attempt });
            let delay = backoff_delay(attempt, self.config.backoff_min, self.config.backoff_max);
            sleep(delay).await;
            if self.adapter.connect().await.is_ok() {
                self.set_state(ChannelState::Healthy);
                self.consecutive_failures.store(0, Ordering::SeqCst);
                let _ = self.events_tx.send(ChannelLifecycleEvent::Healthy);
                return;
            }
        }
        warn!("exhausted reconnect attempts, remaining unhealthy");
    }

    fn spawn_worker(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<QueuedSend>) {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                this.inflight.fetch_add(1, Ordering::SeqCst);
                while this.state() == ChannelState::Unhealthy {
                    sleep(Duration::from_millis(100)).await;
                }
                let outcome = this.send_with_retry(&item.target, item.payload.clone()).await;
                if let Err(err) = &outcome {
                    let _ = this.events_tx.send(ChannelLifecycleEvent::SendFailed {
                        target: item.target.clone(),
                        attempts: this.config.send_queue_max_attempts,
                        reason: err.to_string(),
                    });
                }
                let _ = item.reply.send(outcome);
                this.inflight.fetch_sub(1, Ordering::SeqCst);
                if this.inflight.load(Ordering::SeqCst) == 0 {
                    this.drained.notify_waiters();
                }
            }
        });
    }

    async fn send_with_retry(&self, target: &str, payload: Value) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.adapter.send(target, payload.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt >= self.config.send_queue_max_attempts => {
                    return Err(ChannelError::MaxAttemptsExceeded {
                        attempts: attempt,
                        reason: err.to_string(),
                    });
                }
                Err(_) => {
                    let delay = backoff_delay(attempt, self.config.backoff_min, self.config.backoff_max);
                    sleep(delay).await;
                }
            }
        }
    }

    pub async fn send(&self, target: &str, payload: Value) -> Result<()> {
        if !self.can_accept_messages() {
            return Err(ChannelError::NotHealthy);
        }
        let tx = {
            let guard = self.queue_tx.lock().await;
            guard.clone().ok_or(ChannelError::NotHealthy)?
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(QueuedSend {
            target: target.to_string(),
            payload,
            reply: reply_tx,
        })
        .map_err(|_| ChannelError::NotHealthy)?;
        reply_rx.await.map_err(|_| ChannelError::NotHealthy)?
    }

    pub async fn typing(&self, target: &str) {
        if self.state() != ChannelState::Healthy {
            return;
        }
        let _ = self.adapter.typing(target).await;
    }

    pub async fn stop(&self) -> Result<()> {
        if matches!(self.state(), ChannelState::Idle | ChannelState::Stopping) {
            return Ok(());
        }
        self.set_state(ChannelState::Stopping);
        *self.queue_tx.lock().await = None;

        if self.inflight.load(Ordering::SeqCst) > 0 {
            let wait = self.drained.notified();
            let timed_out = tokio::time::timeout(self.config.shutdown_timeout, wait).await.is_err();
            if timed_out {
                warn!("send queue drain timed out during stop");
            }
        }

        if let Err(err) = self.adapter.disconnect().await {
            warn!(error = %err, "adapter disconnect failed during stop");
        }
        self.set_state(ChannelState::Idle);
        let _ = self.events_tx.send(ChannelLifecycleEvent::Stopped);
        Ok(())
    }
}

fn backoff_delay(attempt: u32, min: Duration, max: Duration) -> Duration {
    let scaled = min.as_millis().saturating_mul(1u128 << attempt.min(20));
    Duration::from_millis(scaled.min(max.as_millis()) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct FlakyAdapter {
        healthy: AtomicBool,
        send_failures_remaining: AtomicU32,
    }

    #[async_trait::async_trait]
    impl ChannelAdapter for FlakyAdapter {
        fn platform(&self) -> &str {
            "flaky"
        }

        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
        async fn health_check(&self) -> Result<()> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ChannelError::Adapter("down".to_string()))
            }
        }
        async fn send(&self, _target: &str, _payload: Value) -> Result<()> {
            if self.send_failures_remaining.load(Ordering::SeqCst) > 0 {
                self.send_failures_remaining.fetch_sub(1, Ordering::SeqCst);
                Err(ChannelError::Adapter("rate limited".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn start_transitions_idle_to_healthy() {
        let adapter = Arc::new(FlakyAdapter {
            healthy: AtomicBool::new(true),
            send_failures_remaining: AtomicU32::new(0),
        });
        let lifecycle = Arc::new(ChannelLifecycle::new(adapter));
        lifecycle.start().await.unwrap();
        assert_eq!(lifecycle.state(), ChannelState::Healthy);
    }

    #[tokio::test]
    async fn send_retries_transient_failures_then_succeeds() {
        let adapter = Arc::new(FlakyAdapter {
            healthy: AtomicBool::new(true),
            send_failures_remaining: AtomicU32::new(2),
        });
        let lifecycle = Arc::new(ChannelLifecycle::with_config(
            adapter,
            ChannelLifecycleConfig {
                backoff_min: Duration::from_millis(1),
                backoff_max: Duration::from_millis(5),
                ..ChannelLifecycleConfig::default()
            },
        ));
        lifecycle.start().await.unwrap();
        lifecycle.send("user1", serde_json::json!({"text": "hi"})).await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let adapter = Arc::new(FlakyAdapter {
            healthy: AtomicBool::new(true),
            send_failures_remaining: AtomicU32::new(0),
        });
        let lifecycle = Arc::new(ChannelLifecycle::new(adapter));
        lifecycle.start().await.unwrap();
        lifecycle.stop().await.unwrap();
        lifecycle.stop().await.unwrap();
        assert_eq!(lifecycle.state(), ChannelState::Idle);
    }

    #[tokio::test]
    async fn cannot_send_while_idle() {
        let adapter = Arc::new(FlakyAdapter {
            healthy: AtomicBool::new(true),
            send_failures_remaining: AtomicU32::new(0),
        });
        let lifecycle = Arc::new(ChannelLifecycle::new(adapter));
        let err = lifecycle.send("user1", serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.code(), "CHANNEL_NOT_HEALTHY");
    }
}
