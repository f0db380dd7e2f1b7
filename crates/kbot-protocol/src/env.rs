//! Environment variable names the supervisor sets for its child, and the
//! argv flag carrying the checkpoint path.

pub const KBOT_SUPERVISED: &str = "KBOT_SUPERVISED";
pub const KBOT_SUPERVISOR_PID: &str = "KBOT_SUPERVISOR_PID";
pub const KBOT_CHECKPOINT_PATH: &str = "KBOT_CHECKPOINT_PATH";
pub const KBOT_IPC_SOCKET: &str = "KBOT_IPC_SOCKET";

pub const CHECKPOINT_ARGV_FLAG: &str = "--checkpoint";

/// True when the current process was spawned by a kbot supervisor.
pub fn is_supervised() -> bool {
    std::env::var(KBOT_SUPERVISED).map(|v| v == "1").unwrap_or(false)
}

/// The checkpoint path passed down by the supervisor, if any.
pub fn checkpoint_path_from_env() -> Option<String> {
    std::env::var(KBOT_CHECKPOINT_PATH).ok()
}

/// The IPC socket path passed down by the supervisor, if any.
pub fn ipc_socket_from_env() -> Option<String> {
    std::env::var(KBOT_IPC_SOCKET).ok()
}
