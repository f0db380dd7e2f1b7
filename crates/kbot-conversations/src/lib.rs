pub mod error;
pub mod events;
pub mod index;
pub mod manager;
pub mod reconstructor;
pub mod types;

pub use error::{ConversationStoreError, Result};
pub use events::ConversationStoreEvent;
pub use manager::ConversationStore;
pub use reconstructor::{ReconstructOptions, ReconstructResult, TurnReconstructor};
pub use types::{
    AppendTurnInput, AppendTurnOutcome, Conversation, ConversationStatus, EventRange, Turn, TurnRole,
};
