use std::collections::HashSet;

use crate::error::ChatResult;
use crate::hub::Caller;
use crate::model::{ConversationId, UserId};
use crate::protocol::ServerEvent;

use super::{claimed_identity, fan_out, MessageRouter};

impl MessageRouter {
    /// Best-effort and never persisted. Reaches other participants only,
    /// not the sender's own devices. Returns how many connections took it.
    pub async fn typing(
        &self,
        caller: &Caller,
        conversation_id: ConversationId,
        sender_id: UserId,
    ) -> ChatResult<usize> {
        claimed_identity(caller, conversation_id, sender_id)?;
        let conversation = self
            .authorizer
            .require_participant(conversation_id, sender_id)
            .await?;
        let sender = self.display_info(sender_id).await?;

        let others: HashSet<UserId> = conversation.others(sender_id).collect();
        let connections = self.registry.connections_for(&others).await;

        Ok(fan_out(
            &connections,
            &ServerEvent::UserTyping {
                conversation_id,
                sender_display_name: sender.name,
                sender_avatar_url: sender.avatar_url,
            },
        ))
    }
}
