use std::sync::Arc;

use crate::error::{ChatError, ChatResult, Missing};
use crate::model::{Conversation, ConversationId, UserId};
use crate::store::ConversationStore;

/// Checks conversation membership before any operation touches it.
#[derive(Clone)]
pub struct ConversationAuthorizer {
    conversations: Arc<dyn ConversationStore>,
}

impl ConversationAuthorizer {
    pub fn new(conversations: Arc<dyn ConversationStore>) -> Self {
        Self { conversations }
    }

    /// Returns the conversation when `user_id` takes part in it.
    pub async fn require_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> ChatResult<Conversation> {
        let Some(conversation) = self.conversations.get(conversation_id).await? else {
            return Err(ChatError::NotFound(Missing::Conversation(conversation_id)));
        };

        if !conversation.is_well_formed() {
            tracing::error!(
                %conversation_id,
                kind = conversation.kind.as_str(),
                participants = conversation.participants.len(),
                "conversation violates its participant invariant"
            );
            return Err(ChatError::NotFound(Missing::Conversation(conversation_id)));
        }

        if !conversation.has_participant(user_id) {
            return Err(ChatError::Authorization { user_id, conversation_id });
        }

        Ok(conversation)
    }
}
