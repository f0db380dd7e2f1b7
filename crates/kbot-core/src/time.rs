//! Shared time helpers so every component stamps records the same way.

/// Milliseconds since the Unix epoch, used for `SessionEvent.ts` /
/// `ConversationTurn.ts`.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// RFC 3339 timestamp string, used for YAML metadata (`created_at`,
/// `updated_at`, `started_at`, `ended_at`).
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
