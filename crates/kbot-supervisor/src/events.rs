#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    Spawn { pid: u32 },
    Exit { code: Option<i32>, signal: Option<i32> },
    Respawn { attempt: u32, backoff_ms: u64 },
    Escalation { consecutive_failures: u32 },
    Draining,
    Shutdown,
    IpcError { message: String },
}
