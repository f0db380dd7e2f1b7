use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kbot_channels::{ChannelAdapter, ChannelLifecycle, ChannelLifecycleConfig, ChannelLifecycleEvent, ChannelState, ChannelError, Result};
use serde_json::{json, Value};

struct RecoveringAdapter {
    connect_calls: AtomicU32,
    healthy: AtomicBool,
    recovers_on_attempt: u32,
}

#[async_trait::async_trait]
impl ChannelAdapter for RecoveringAdapter {
    fn platform(&self) -> &str {
        "recovering"
    }

    async fn connect(&self) -> Result<()> {
        let attempt = self.connect_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt == 1 || attempt > self.recovers_on_attempt {
            Ok(())
        } else {
            Err(ChannelError::Adapter("connect refused".to_string()))
        }
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ChannelError::Adapter("stalled".to_string()))
        }
    }

    async fn send(&self, _target: &str, _payload: Value) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn unhealthy_channel_reconnects_and_resumes_sends() {
    let adapter = Arc::new(RecoveringAdapter {
        connect_calls: AtomicU32::new(0),
        healthy: AtomicBool::new(true),
        recovers_on_attempt: 2,
    });
    let lifecycle = Arc::new(ChannelLifecycle::with_config(
        adapter.clone(),
        ChannelLifecycleConfig {
            health_check_interval: Duration::from_millis(10),
            failure_threshold: 1,
            backoff_min: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
            ..ChannelLifecycleConfig::default()
        },
    ));
    let mut events = lifecycle.subscribe();

    lifecycle.start().await.unwrap();
    assert_eq!(lifecycle.state(), ChannelState::Healthy);

    adapter.healthy.store(false, Ordering::SeqCst);
    // Give the health-check loop a couple of ticks to notice, fail, and
    // recover via reconnect.
    tokio::time::sleep(Duration::from_millis(80)).await;
    adapter.healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(lifecycle.state(), ChannelState::Healthy);
    lifecycle.send("user1", json!({"text": "back online"})).await.unwrap();

    let mut saw_unhealthy = false;
    let mut saw_reconnecting = false;
    while let Ok(event) = events.try_recv() {
        match event {
            ChannelLifecycleEvent::Unhealthy { .. } => saw_unhealthy = true,
            ChannelLifecycleEvent::Reconnecting { .. } => saw_reconnecting = true,
            _ => {}
        }
    }
    assert!(saw_unhealthy, "expected an Unhealthy transition event");
    assert!(saw_reconnecting, "expected at least one Reconnecting attempt");
}

#[tokio::test]
async fn stop_drains_in_flight_sends_before_disconnect() {
    let adapter = Arc::new(RecoveringAdapter {
        connect_calls: AtomicU32::new(0),
        healthy: AtomicBool::new(true),
        recovers_on_attempt: 0,
    });
    let lifecycle = Arc::new(ChannelLifecycle::new(adapter));
    lifecycle.start().await.unwrap();

    for i in 0..5 {
        lifecycle
            .send(&format!("user{i}"), json!({"text": "hi"}))
            .await
            .unwrap();
    }

    lifecycle.stop().await.unwrap();
    assert_eq!(lifecycle.state(), ChannelState::Idle);
    assert!(lifecycle.send("user0", json!({})).await.is_err());
}
