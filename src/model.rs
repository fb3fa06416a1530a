use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

macro_rules! int_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

int_id!(UserId);
int_id!(ConversationId);
int_id!(MessageId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationKind {
    Private,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Private => "Private",
            ConversationKind::Group => "Group",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "Private" => Some(ConversationKind::Private),
            "Group" => Some(ConversationKind::Group),
            _ => None,
        }
    }
}

/// What the core needs to know about a conversation. Participants are fixed
/// at creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    pub name: String,
    pub participants: Vec<UserId>,
    pub last_message_at: Option<OffsetDateTime>,
}

impl Conversation {
    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.participants.contains(&user_id)
    }

    /// Private conversations hold exactly two members, groups at least one.
    pub fn is_well_formed(&self) -> bool {
        match self.kind {
            ConversationKind::Private => self.participants.len() == 2,
            ConversationKind::Group => !self.participants.is_empty(),
        }
    }

    pub fn others(&self, user_id: UserId) -> impl Iterator<Item = UserId> + '_ {
        self.participants.iter().copied().filter(move |p| *p != user_id)
    }
}

/// Aggregate delivery status of a message. Ordered so that a transition is
/// only ever forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MessageStatus {
    Sent,
    Received,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "Sent",
            MessageStatus::Received => "Received",
            MessageStatus::Read => "Read",
        }
    }

    pub fn parse(status: &str) -> Option<Self> {
        match status {
            "Sent" => Some(MessageStatus::Sent),
            "Received" => Some(MessageStatus::Received),
            "Read" => Some(MessageStatus::Read),
            _ => None,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message before the store has assigned it an id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: String,
    pub status: MessageStatus,
}

/// Authoritative identity handed back by the message store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Persisted {
    pub id: MessageId,
    pub sent_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: String,
    pub status: MessageStatus,
    pub sent_at: OffsetDateTime,
}

/// Session key encrypted under one participant's public key. Opaque to the
/// server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKeyEntry {
    pub user_id: UserId,
    #[serde(rename = "encryptedSessionKey")]
    pub ciphertext: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DisplayInfo {
    pub name: String,
    pub avatar_url: Option<String>,
}
