pub mod acp;
pub mod error;
pub mod events;
pub mod manager;
pub mod types;
pub mod usage;

pub use acp::AcpClient;
pub use error::{LifecycleError, Result};
pub use events::{LifecycleEvent, UsageEvent};
pub use manager::SessionLifecycle;
pub use types::{GetOrCreateOutcome, GetOrCreateResult, LifecycleConfig, LiveSession, UsageSnapshot};
pub use usage::ContextUsageTracker;
