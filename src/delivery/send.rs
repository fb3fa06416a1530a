use std::collections::HashSet;

use crate::error::{ChatError, ChatResult, DeliveryReport};
use crate::hub::Caller;
use crate::model::{ConversationId, MessageId, MessageStatus, NewMessage, UserId};
use crate::protocol::ServerEvent;
use crate::push::NewMessageNotice;

use super::{claimed_identity, fan_out, MessageRouter};

/// What happened to one SendMessage call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: MessageId,
    pub status: MessageStatus,
    /// Recipient connections (sender's own devices excluded) that accepted
    /// the message.
    pub delivered_live: usize,
    pub echoed: usize,
    pub offline_recipients: Vec<UserId>,
    pub push: DeliveryReport,
}

impl MessageRouter {
    pub async fn send_message(
        &self,
        caller: &Caller,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: String,
        message_type: String,
    ) -> ChatResult<SendReceipt> {
        claimed_identity(caller, conversation_id, sender_id)?;
        let conversation = self
            .authorizer
            .require_participant(conversation_id, sender_id)
            .await?;

        if content.is_empty() {
            return Err(ChatError::validation("message content is empty"));
        }
        if message_type.trim().is_empty() {
            return Err(ChatError::validation("message type is empty"));
        }

        let ordering = self.locks.acquire(conversation_id).await;

        let persisted = self
            .messages
            .persist(NewMessage {
                conversation_id,
                sender_id,
                content: content.clone(),
                message_type: message_type.clone(),
                status: MessageStatus::Sent,
            })
            .await?;
        let message_id = persisted.id;

        // presence is decided once, here; later disconnects do not trigger push
        let (recipient_connections, offline_recipients) =
            self.registry.partition(conversation.others(sender_id)).await;
        let sender_connections = self
            .registry
            .connections_for(&HashSet::from([sender_id]))
            .await;

        let event = ServerEvent::ReceiveMessage {
            conversation_id,
            sender_id,
            content: content.clone(),
            message_type,
            send_timestamp: persisted.sent_at,
            status: MessageStatus::Sent,
            message_id,
        };
        let delivered_live = fan_out(&recipient_connections, &event);
        let echoed = fan_out(&sender_connections, &event);
        drop(ordering);

        tracing::info!(
            %conversation_id,
            %message_id,
            %sender_id,
            delivered_live,
            echoed,
            offline = offline_recipients.len(),
            "message delivered"
        );

        if let Err(err) = self
            .conversations
            .touch_last_message(conversation_id, persisted.sent_at)
            .await
        {
            tracing::warn!(%conversation_id, error = %err, "could not bump last message time");
        }

        let mark_received = async {
            if delivered_live == 0 {
                return MessageStatus::Sent;
            }
            match self.messages.update_status(message_id, MessageStatus::Received).await {
                Ok(true) => {}
                // a reader got there first
                Ok(false) => return MessageStatus::Read,
                Err(err) => {
                    tracing::error!(%message_id, error = %err, "could not mark message received");
                    return MessageStatus::Sent;
                }
            }
            let connections = self.participant_connections(&conversation.participants).await;
            fan_out(
                &connections,
                &ServerEvent::UpdateMessageStatus {
                    message_id,
                    status: MessageStatus::Received,
                },
            );
            MessageStatus::Received
        };

        let push_offline = async {
            if offline_recipients.is_empty() {
                return DeliveryReport::default();
            }
            self.push_fallback(conversation_id, message_id, sender_id, &content, &offline_recipients)
                .await
        };

        let (status, push) = tokio::join!(mark_received, push_offline);

        Ok(SendReceipt {
            message_id,
            status,
            delivered_live,
            echoed,
            offline_recipients,
            push,
        })
    }

    async fn push_fallback(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        sender_id: UserId,
        content: &str,
        offline: &[UserId],
    ) -> DeliveryReport {
        let tokens = match self.directory.push_tokens_for(offline).await {
            Ok(tokens) => tokens,
            Err(err) => {
                tracing::error!(%message_id, error = %err, "could not look up push tokens");
                return DeliveryReport::default();
            }
        };
        if tokens.is_empty() {
            tracing::debug!(%message_id, offline = offline.len(), "no push tokens for offline recipients");
            return DeliveryReport::default();
        }

        let sender_name = match self.display_info(sender_id).await {
            Ok(info) => info.name,
            Err(err) => {
                tracing::warn!(%sender_id, error = %err, "sender has no display info");
                String::new()
            }
        };

        self.notifier
            .notify(
                tokens,
                &NewMessageNotice {
                    conversation_id,
                    message_id,
                    sender_id,
                    sender_name: &sender_name,
                    content,
                },
            )
            .await
    }
}
