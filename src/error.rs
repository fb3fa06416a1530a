use thiserror::Error;

use crate::model::{ConversationId, MessageId, UserId};

pub type ChatResult<T> = Result<T, ChatError>;

/// Failures an operation reports back to the client that invoked it.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("user {user_id} is not a participant of conversation {conversation_id}")]
    Authorization {
        user_id: UserId,
        conversation_id: ConversationId,
    },

    #[error("{0} not found")]
    NotFound(Missing),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("store failure: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    Conversation(ConversationId),
    Message(MessageId),
    User(UserId),
    SessionKey(ConversationId, UserId),
}

impl std::fmt::Display for Missing {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Missing::Conversation(id) => write!(f, "conversation {id}"),
            Missing::Message(id) => write!(f, "message {id}"),
            Missing::User(id) => write!(f, "user {id}"),
            Missing::SessionKey(conversation_id, user_id) => {
                write!(f, "session key for user {user_id} in conversation {conversation_id}")
            }
        }
    }
}

impl ChatError {
    /// Short, stable tag used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::Authentication(_) => "authentication",
            ChatError::Authorization { .. } => "authorization",
            ChatError::NotFound(_) => "not_found",
            ChatError::Validation(_) => "validation",
            ChatError::Store(_) => "internal",
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ChatError::Validation(msg.into())
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(err: sqlx::Error) -> Self {
        ChatError::Store(anyhow::Error::from(err))
    }
}

/// Outcome of one multicast push. Failures here never reach the sender of
/// the message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub failed: Vec<(String, String)>,
}

impl DeliveryReport {
    pub fn is_partial_failure(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn delivered(&self) -> usize {
        self.attempted.saturating_sub(self.failed.len())
    }
}
