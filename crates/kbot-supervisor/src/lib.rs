#![cfg(unix)]

pub mod error;
pub mod events;
pub mod ipc;
pub mod manager;
pub mod types;

pub use error::{Result, SupervisorError};
pub use events::SupervisorEvent;
pub use ipc::{IpcHandler, IpcServer};
pub use manager::Supervisor;
pub use types::{RunStatus, SupervisorConfig};
