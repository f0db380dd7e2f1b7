//! Rebuilds human-readable turn content from a session's raw event log.
//! Turns themselves only ever store `{start_seq, end_seq}` pointers; this
//! is where that range gets walked back into text on demand.

use kbot_core::CoreError;
use kbot_sessions::{SessionEvent, SessionStore};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const DEFAULT_TRUNCATE_BUDGET: usize = 200;

#[derive(Debug, Clone, Copy)]
pub struct ReconstructOptions {
    pub summarize_tool_calls: bool,
    pub truncate_budget: usize,
}

impl Default for ReconstructOptions {
    fn default() -> Self {
        Self {
            summarize_tool_calls: true,
            truncate_budget: DEFAULT_TRUNCATE_BUDGET,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructResult {
    pub content: String,
    pub has_gaps: bool,
    pub events_read: u64,
    pub events_missing: u64,
}

#[derive(Debug, Clone)]
struct ToolCallState {
    kind: String,
    input: String,
    status: Option<String>,
    detail: Option<String>,
}

pub struct TurnReconstructor<'a> {
    sessions: &'a SessionStore,
    options: ReconstructOptions,
}

impl<'a> TurnReconstructor<'a> {
    pub fn new(sessions: &'a SessionStore) -> Self {
        Self {
            sessions,
            options: ReconstructOptions::default(),
        }
    }

    pub fn with_options(sessions: &'a SessionStore, options: ReconstructOptions) -> Self {
        Self { sessions, options }
    }

    pub async fn reconstruct_content(
        &self,
        session_id: &str,
        start_seq: u64,
        end_seq: u64,
    ) -> Result<ReconstructResult> {
        if session_id.trim().is_empty() {
            return Err(CoreError::validation("session_id", "session_id must not be empty").into());
        }
        if start_seq > end_seq {
            return Err(CoreError::validation("start_seq", "start_seq must be <= end_seq").into());
        }

        let all_events = self.sessions.read_events(session_id).await?;
        let mut by_seq: std::collections::BTreeMap<u64, SessionEvent> = std::collections::BTreeMap::new();
        for event in all_events {
            if event.seq >= start_seq && event.seq <= end_seq {
                by_seq.insert(event.seq, event);
            }
        }

        let expected = end_seq - start_seq + 1;
        let events_read = by_seq.len() as u64;
        let events_missing = expected.saturating_sub(events_read);
        let has_gaps = events_missing > 0;

        if events_read == 0 {
            return Ok(ReconstructResult {
                content: "[gap: all events missing]".to_string(),
                has_gaps: true,
                events_read: 0,
                events_missing: expected,
            });
        }

        let mut parts = Vec::new();
        let mut tool_calls: std::collections::HashMap<String, ToolCallState> = std::collections::HashMap::new();
        let mut gap_start: Option<u64> = None;

        for seq in start_seq..=end_seq {
            match by_seq.get(&seq) {
                None => {
                    if gap_start.is_none() {
                        gap_start = Some(seq);
                    }
                }
                Some(event) => {
                    if let Some(g) = gap_start.take() {
                        parts.push(format_gap(g, seq - 1));
                    }
                    if let Some(rendered) = self.render_event(event, &mut tool_calls) {
                        parts.push(rendered);
                    }
                }
            }
        }
        if let Some(g) = gap_start.take() {
            parts.push(format_gap(g, end_seq));
        }

        Ok(ReconstructResult {
            content: parts.join("\n"),
            has_gaps,
            events_read,
            events_missing,
        })
    }

    fn render_event(
        &self,
        event: &SessionEvent,
        tool_calls: &mut std::collections::HashMap<String, ToolCallState>,
    ) -> Option<String> {
        match event.event_type.as_str() {
            "prompt.sent" | "message.chunk" => event
                .data
                .get("content")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            "session.update" => self.render_session_update(event, tool_calls),
            "tool.call" => {
                if !self.options.summarize_tool_calls {
                    return None;
                }
                let id = call_key(event, "call_id");
                let kind = event
                    .data
                    .get("kind")
                    .and_then(|v| v.as_str())
                    .unwrap_or("tool")
                    .to_string();
                let input = self.truncate_input(&event.data.get("input"));
                tool_calls.insert(
                    id,
                    ToolCallState {
                        kind,
                        input,
                        status: Some("pending".to_string()),
                        detail: None,
                    },
                );
                None
            }
            "tool.result" => {
                if !self.options.summarize_tool_calls {
                    return None;
                }
                let id = call_key(event, "call_id");
                let success = event.data.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
                let detail = event
                    .data
                    .get("detail")
                    .and_then(|v| v.as_str())
                    .map(|s| self.truncate(s));
                if let Some(state) = tool_calls.get_mut(&id) {
                    state.status = Some(if success { "success" } else { "failure" }.to_string());
                    state.detail = detail;
                    Some(render_tool_call(state))
                } else {
                    let state = ToolCallState {
                        kind: "tool".to_string(),
                        input: String::new(),
                        status: Some(if success { "success" } else { "failure" }.to_string()),
                        detail,
                    };
                    Some(render_tool_call(&state))
                }
            }
            _ => None,
        }
    }

    fn render_session_update(
        &self,
        event: &SessionEvent,
        tool_calls: &mut std::collections::HashMap<String, ToolCallState>,
    ) -> Option<String> {
        let update_type = event.data.get("type").and_then(|v| v.as_str())?;
        match update_type {
            "agent_message_chunk" => event
                .data
                .pointer("/payload/content/text")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            "tool_call" | "tool_call_update" => {
                if !self.options.summarize_tool_calls {
                    return None;
                }
                let id = event
                    .data
                    .get("toolCallId")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let entry = tool_calls.entry(id.clone()).or_insert(ToolCallState {
                    kind: "tool".to_string(),
                    input: String::new(),
                    status: None,
                    detail: None,
                });
                if let Some(kind) = event.data.get("kind").and_then(|v| v.as_str()) {
                    entry.kind = kind.to_string();
                }
                if let Some(input) = event.data.get("input") {
                    entry.input = self.truncate_input(&Some(input));
                }
                if let Some(status) = event.data.get("status").and_then(|v| v.as_str()) {
                    entry.status = Some(status.to_string());
                }
                if update_type == "tool_call_update" {
                    let rendered = render_tool_call(entry);
                    Some(rendered)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn truncate_input(&self, value: &Option<&serde_json::Value>) -> String {
        match value {
            Some(serde_json::Value::String(s)) => self.truncate_path_like(s),
            Some(v) => self.truncate(&v.to_string()),
            None => String::new(),
        }
    }

    /// Truncates at the tail, keeping the head (the command verb) visible.
    fn truncate(&self, s: &str) -> String {
        let budget = self.options.truncate_budget;
        if s.chars().count() <= budget {
            s.to_string()
        } else {
            let head: String = s.chars().take(budget.saturating_sub(1)).collect();
            format!("{head}…")
        }
    }

    /// Path-like inputs are truncated at the head so the filename at the
    /// tail stays visible; everything else truncates at the tail.
    fn truncate_path_like(&self, s: &str) -> String {
        let budget = self.options.truncate_budget;
        if s.chars().count() <= budget {
            return s.to_string();
        }
        if s.contains('/') || s.contains('\\') {
            let tail: String = s.chars().rev().take(budget.saturating_sub(1)).collect();
            let tail: String = tail.chars().rev().collect();
            format!("…{tail}")
        } else {
            self.truncate(s)
        }
    }
}

fn call_key(event: &SessionEvent, field: &str) -> String {
    event
        .data
        .get(field)
        .and_then(|v| v.as_str())
        .or(event.trace_id.as_deref())
        .unwrap_or("unknown")
        .to_string()
}

fn render_tool_call(state: &ToolCallState) -> String {
    let status = state.status.as_deref().unwrap_or("pending");
    match &state.detail {
        Some(detail) => format!("[tool: {} | {} | {} | {}]", state.kind, state.input, status, detail),
        None => format!("[tool: {} | {} | {}]", state.kind, state.input, status),
    }
}

fn format_gap(start: u64, end: u64) -> String {
    if start == end {
        format!("[gap: event {start} missing]")
    } else {
        format!("[gap: events {start}-{end} missing]")
    }
}
