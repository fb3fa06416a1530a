//! Collaborators the delivery core talks to. Persistence mechanics live
//! behind these traits.

mod memory;
mod sqlite;

use std::collections::BTreeMap;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::ChatResult;
use crate::model::{
    Conversation, ConversationId, DisplayInfo, MessageId, MessageStatus, NewMessage, Persisted,
    SessionKeyEntry, StoredMessage, UserId,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Resolves a presented credential to an internal user id.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Fails with `ChatError::Authentication` for missing, unknown or
    /// expired credentials.
    async fn resolve(&self, credential: &str) -> ChatResult<UserId>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get(&self, conversation_id: ConversationId) -> ChatResult<Option<Conversation>>;

    /// Entries are written once. If any user already has one for this
    /// conversation the call fails with `Validation` and writes nothing.
    async fn save_key_entries(
        &self,
        conversation_id: ConversationId,
        entries: &[SessionKeyEntry],
    ) -> ChatResult<()>;

    async fn encrypted_key_entry_for(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> ChatResult<Option<String>>;

    async fn touch_last_message(
        &self,
        conversation_id: ConversationId,
        at: OffsetDateTime,
    ) -> ChatResult<()>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Assigns the authoritative id and timestamp.
    async fn persist(&self, message: NewMessage) -> ChatResult<Persisted>;

    async fn get(&self, message_id: MessageId) -> ChatResult<Option<StoredMessage>>;

    /// Moves the aggregate status forward only. Returns false when the
    /// message was already at or past `status`.
    async fn update_status(&self, message_id: MessageId, status: MessageStatus) -> ChatResult<bool>;

    /// Records a per-user read receipt. Returns false if one already existed.
    async fn record_read(
        &self,
        message_id: MessageId,
        user_id: UserId,
        at: OffsetDateTime,
    ) -> ChatResult<bool>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Users without a registered key are left out of the map.
    async fn public_keys_for(&self, user_ids: &[UserId]) -> ChatResult<BTreeMap<UserId, String>>;

    async fn display_info(&self, user_id: UserId) -> ChatResult<Option<DisplayInfo>>;

    async fn push_tokens_for(&self, user_ids: &[UserId]) -> ChatResult<Vec<String>>;
}
