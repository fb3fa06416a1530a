//! JSON frames exchanged over the realtime channel.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ChatError;
use crate::model::{ConversationId, MessageId, MessageStatus, SessionKeyEntry, UserId};

pub const DEFAULT_MESSAGE_TYPE: &str = "Text";

fn default_message_type() -> String {
    DEFAULT_MESSAGE_TYPE.to_owned()
}

/// Operations a connected client may invoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    SendMessage {
        conversation_id: ConversationId,
        sender_id: UserId,
        content: String,
        #[serde(default = "default_message_type")]
        message_type: String,
    },
    Typing {
        conversation_id: ConversationId,
        sender_id: UserId,
    },
    JoinConversation {
        conversation_id: ConversationId,
    },
    MarkRead {
        message_id: MessageId,
    },
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::SendMessage { .. } => "SendMessage",
            ClientCommand::Typing { .. } => "Typing",
            ClientCommand::JoinConversation { .. } => "JoinConversation",
            ClientCommand::MarkRead { .. } => "MarkRead",
        }
    }
}

/// Events pushed from the server to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    ReceiveMessage {
        conversation_id: ConversationId,
        sender_id: UserId,
        content: String,
        message_type: String,
        #[serde(with = "time::serde::rfc3339")]
        send_timestamp: OffsetDateTime,
        status: MessageStatus,
        message_id: MessageId,
    },
    UpdateMessageStatus {
        message_id: MessageId,
        status: MessageStatus,
    },
    UserTyping {
        conversation_id: ConversationId,
        sender_display_name: String,
        sender_avatar_url: Option<String>,
    },
    ReceivePublicKeysAndSessionKey {
        public_keys: BTreeMap<UserId, String>,
        session_key_entry: SessionKeyEntry,
    },
    Error {
        kind: String,
        message: String,
        op: Option<String>,
    },
}

impl ServerEvent {
    pub fn failure(op: Option<&str>, err: &ChatError) -> Self {
        let message = match err {
            // collaborator details stay in the server log
            ChatError::Store(_) => "internal error".to_owned(),
            _ => err.to_string(),
        };
        ServerEvent::Error {
            kind: err.kind().to_owned(),
            message,
            op: op.map(str::to_owned),
        }
    }
}
