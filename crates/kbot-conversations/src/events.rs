use crate::types::Conversation;

#[derive(Debug, Clone)]
pub enum ConversationStoreEvent {
    ConversationCreated(Conversation),
    ConversationArchived(Conversation),
    TurnAppended { conversation_id: String, seq: u64, was_duplicate: bool },
    ReadError { conversation_id: String, skipped: u64 },
}
