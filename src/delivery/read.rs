use time::OffsetDateTime;

use crate::error::{ChatError, ChatResult, Missing};
use crate::hub::Caller;
use crate::model::{MessageId, MessageStatus};
use crate::protocol::ServerEvent;

use super::{fan_out, MessageRouter};

impl MessageRouter {
    /// Records the caller's read receipt and moves the aggregate status to
    /// Read. Marking twice changes nothing.
    pub async fn mark_read(&self, caller: &Caller, message_id: MessageId) -> ChatResult<MessageStatus> {
        let Some(message) = self.messages.get(message_id).await? else {
            return Err(ChatError::NotFound(Missing::Message(message_id)));
        };
        let conversation = self
            .authorizer
            .require_participant(message.conversation_id, caller.user_id)
            .await?;

        if message.sender_id == caller.user_id {
            return Err(ChatError::validation("senders cannot mark their own message read"));
        }

        let first_read = self
            .messages
            .record_read(message_id, caller.user_id, OffsetDateTime::now_utc())
            .await?;
        if !first_read {
            tracing::debug!(%message_id, user_id = %caller.user_id, "read receipt already recorded");
        }

        if !self.messages.update_status(message_id, MessageStatus::Read).await? {
            return Ok(MessageStatus::Read);
        }

        let connections = self.participant_connections(&conversation.participants).await;
        fan_out(
            &connections,
            &ServerEvent::UpdateMessageStatus {
                message_id,
                status: MessageStatus::Read,
            },
        );

        Ok(MessageStatus::Read)
    }
}
