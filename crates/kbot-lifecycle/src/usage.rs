//! Best-effort `/usage` probing. A cache keyed by ACP session id avoids
//! re-issuing the probe prompt more often than `debounce_interval`, and a
//! stale cached value is always preferred to returning nothing.

use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::warn;

use crate::acp::AcpClient;
use crate::events::UsageEvent;
use crate::types::{UsageSnapshot, DEFAULT_USAGE_DEBOUNCE_MS, DEFAULT_USAGE_PROBE_TIMEOUT_MS};

const USAGE_BLOCK_START: &str = "<local-command-stdout>";
const USAGE_BLOCK_END: &str = "</local-command-stdout>";

pub struct ContextUsageTracker {
    debounce: Duration,
    probe_timeout: Duration,
    cache: DashMap<String, (UsageSnapshot, Instant)>,
    events_tx: broadcast::Sender<UsageEvent>,
}

impl Default for ContextUsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextUsageTracker {
    pub fn new() -> Self {
        Self::with_intervals(
            Duration::from_millis(DEFAULT_USAGE_DEBOUNCE_MS),
            Duration::from_millis(DEFAULT_USAGE_PROBE_TIMEOUT_MS),
        )
    }

    pub fn with_intervals(debounce: Duration, probe_timeout: Duration) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            debounce,
            probe_timeout,
            cache: DashMap::new(),
            events_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UsageEvent> {
        self.events_tx.subscribe()
    }

    pub fn cached(&self, acp_session_id: &str) -> Option<UsageSnapshot> {
        self.cache.get(acp_session_id).map(|entry| entry.0.clone())
    }

    pub async fn probe(
        &self,
        session_key: &str,
        acp_session_id: &str,
        client: &dyn AcpClient,
    ) -> Option<UsageSnapshot> {
        if let Some(entry) = self.cache.get(acp_session_id) {
            if entry.1.elapsed() < self.debounce {
                return Some(entry.0.clone());
            }
        }

        let mut rx = client.subscribe_stderr(acp_session_id).await;

        if let Err(err) = client.send_usage_prompt(acp_session_id).await {
            let _ = self.events_tx.send(UsageEvent::Error {
                session_key: session_key.to_string(),
                message: err.to_string(),
            });
            return self.cached(acp_session_id);
        }

        let result = tokio::time::timeout(self.probe_timeout, collect_usage_block(&mut rx)).await;

        match result {
            Ok(Some(block)) => match parse_usage_block(&block) {
                Some(snapshot) => {
                    self.cache.insert(acp_session_id.to_string(), (snapshot.clone(), Instant::now()));
                    let _ = self.events_tx.send(UsageEvent::Update {
                        session_key: session_key.to_string(),
                        snapshot: snapshot.clone(),
                    });
                    Some(snapshot)
                }
                None => {
                    let _ = self.events_tx.send(UsageEvent::Error {
                        session_key: session_key.to_string(),
                        message: "usage block did not parse".to_string(),
                    });
                    self.cached(acp_session_id)
                }
            },
            Ok(None) => {
                let _ = self.events_tx.send(UsageEvent::Error {
                    session_key: session_key.to_string(),
                    message: "stderr stream closed before usage block arrived".to_string(),
                });
                self.cached(acp_session_id)
            }
            Err(_) => {
                warn!(session_key, "usage probe timed out");
                let _ = self.events_tx.send(UsageEvent::Timeout {
                    session_key: session_key.to_string(),
                    ms: self.probe_timeout.as_millis() as u64,
                });
                self.cached(acp_session_id)
            }
        }
    }
}

async fn collect_usage_block(rx: &mut broadcast::Receiver<String>) -> Option<String> {
    let mut collecting = false;
    let mut block = String::new();
    loop {
        match rx.recv().await {
            Ok(line) => {
                if !collecting {
                    if let Some(idx) = line.find(USAGE_BLOCK_START) {
                        collecting = true;
                        block.push_str(&line[idx + USAGE_BLOCK_START.len()..]);
                        block.push('\n');
                        if line.contains(USAGE_BLOCK_END) {
                            return Some(block);
                        }
                    }
                } else if line.contains(USAGE_BLOCK_END) {
                    let end_idx = line.find(USAGE_BLOCK_END).unwrap();
                    block.push_str(&line[..end_idx]);
                    return Some(block);
                } else {
                    block.push_str(&line);
                    block.push('\n');
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Parses a block shaped like:
/// ```text
/// claude-sonnet-4 · 42000/200000 tokens (21%)
/// tools: 12k
/// system: 3k
/// ```
fn parse_usage_block(block: &str) -> Option<UsageSnapshot> {
    let mut model = None;
    let mut current = None;
    let mut max = None;
    let mut percentage = None;
    let mut categories = HashMap::new();

    for line in block.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((cur, mx, pct)) = parse_usage_line(line) {
            current = Some(cur);
            max = Some(mx);
            percentage = Some(pct);
            if let Some(sep) = line.find('·') {
                let candidate = line[..sep].trim();
                if !candidate.is_empty() {
                    model = Some(candidate.to_string());
                }
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if let Some(n) = parse_count(value.trim()) {
                categories.insert(name.trim().to_string(), n);
            }
        }
    }

    Some(UsageSnapshot {
        current: current?,
        max: max?,
        percentage: percentage?,
        model,
        categories,
    })
}

fn parse_usage_line(line: &str) -> Option<(u64, u64, f64)> {
    let open = line.find('(')?;
    let close = line[open..].find(')')? + open;
    let pct_str = line[open + 1..close].trim_end_matches('%');
    let percentage: f64 = pct_str.trim().parse().ok()?;

    let before_paren = &line[..open];
    let slash_idx = before_paren.find('/')?;
    let current_str = before_paren[..slash_idx]
        .split_whitespace()
        .last()?;
    let max_str = before_paren[slash_idx + 1..].split_whitespace().next()?;

    Some((parse_count(current_str)?, parse_count(max_str)?, percentage))
}

fn parse_count(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Some(stripped) = raw.strip_suffix('k').or_else(|| raw.strip_suffix('K')) {
        let n: f64 = stripped.parse().ok()?;
        Some((n * 1000.0) as u64)
    } else {
        raw.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_usage_line_with_plain_numbers() {
        let (current, max, pct) = parse_usage_line("42000/200000 tokens (21%)").unwrap();
        assert_eq!(current, 42000);
        assert_eq!(max, 200000);
        assert_eq!(pct, 21.0);
    }

    #[test]
    fn parses_k_suffixed_numbers() {
        let (current, max, pct) = parse_usage_line("42k/200k tokens (21%)").unwrap();
        assert_eq!(current, 42_000);
        assert_eq!(max, 200_000);
        assert_eq!(pct, 21.0);
    }

    #[test]
    fn parses_full_block_with_model_and_categories() {
        let block = "claude-sonnet-4 · 42k/200k tokens (21%)\ntools: 12k\nsystem: 3k\n";
        let snapshot = parse_usage_block(block).unwrap();
        assert_eq!(snapshot.current, 42_000);
        assert_eq!(snapshot.max, 200_000);
        assert_eq!(snapshot.model.as_deref(), Some("claude-sonnet-4"));
        assert_eq!(snapshot.categories.get("tools"), Some(&12_000));
    }
}
