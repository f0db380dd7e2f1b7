pub mod adapter;
pub mod coalescer;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod transform;

pub use adapter::{ChannelAdapter, ChannelCapabilities, InboundHandler, InboundMessage};
pub use coalescer::{Coalescer, CoalescePolicy, CoalescerSink, UpdateBatcher, UpdateSink};
pub use error::{ChannelError, Result};
pub use lifecycle::{ChannelLifecycle, ChannelLifecycleConfig, ChannelLifecycleEvent, ChannelState};
pub use registry::ChannelRegistry;
pub use transform::{JsonTextTransformer, MessageTransformer, NormalizedMessage, TransformerRegistry};
