use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::{ChatError, ChatResult};
use crate::model::{
    Conversation, ConversationId, DisplayInfo, MessageId, MessageStatus, NewMessage, Persisted,
    SessionKeyEntry, StoredMessage, UserId,
};

use super::{ConversationStore, IdentityVerifier, MessageStore, UserDirectory};

#[derive(Debug, Clone, Default)]
struct User {
    display: DisplayInfo,
    public_key: Option<String>,
    push_tokens: Vec<String>,
}

#[derive(Default)]
struct State {
    users: HashMap<UserId, User>,
    tokens: HashMap<String, (UserId, Option<OffsetDateTime>)>,
    conversations: HashMap<ConversationId, Conversation>,
    session_keys: HashMap<(ConversationId, UserId), String>,
    messages: BTreeMap<MessageId, StoredMessage>,
    reads: HashSet<(MessageId, UserId)>,
    status_log: Vec<(MessageId, MessageStatus)>,
    next_message_id: i64,
}

/// Keeps every collaborator's data in memory. Backs the test suites.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(
        &self,
        user_id: UserId,
        name: &str,
        avatar_url: Option<&str>,
        public_key: Option<&str>,
    ) {
        let mut state = self.state.write().await;
        let user = state.users.entry(user_id).or_default();
        user.display = DisplayInfo {
            name: name.to_owned(),
            avatar_url: avatar_url.map(str::to_owned),
        };
        user.public_key = public_key.map(str::to_owned);
    }

    pub async fn add_push_token(&self, user_id: UserId, token: &str) {
        let mut state = self.state.write().await;
        state.users.entry(user_id).or_default().push_tokens.push(token.to_owned());
    }

    pub async fn add_access_token(
        &self,
        token: &str,
        user_id: UserId,
        expires_at: Option<OffsetDateTime>,
    ) {
        let mut state = self.state.write().await;
        state.tokens.insert(token.to_owned(), (user_id, expires_at));
    }

    pub async fn add_conversation(&self, conversation: Conversation) {
        let mut state = self.state.write().await;
        state.conversations.insert(conversation.id, conversation);
    }

    pub async fn messages(&self) -> Vec<StoredMessage> {
        self.state.read().await.messages.values().cloned().collect()
    }

    /// Every status written through `persist` or `update_status`, in order.
    pub async fn status_log(&self) -> Vec<(MessageId, MessageStatus)> {
        self.state.read().await.status_log.clone()
    }

    pub async fn last_message_at(&self, conversation_id: ConversationId) -> Option<OffsetDateTime> {
        let state = self.state.read().await;
        state
            .conversations
            .get(&conversation_id)
            .and_then(|c| c.last_message_at)
    }
}

#[async_trait]
impl IdentityVerifier for MemoryStore {
    async fn resolve(&self, credential: &str) -> ChatResult<UserId> {
        if credential.is_empty() {
            return Err(ChatError::Authentication("missing credential".to_owned()));
        }

        let state = self.state.read().await;
        match state.tokens.get(credential) {
            None => Err(ChatError::Authentication("unknown credential".to_owned())),
            Some((_, Some(expires_at))) if *expires_at <= OffsetDateTime::now_utc() => {
                Err(ChatError::Authentication("credential expired".to_owned()))
            }
            Some((user_id, _)) => Ok(*user_id),
        }
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn get(&self, conversation_id: ConversationId) -> ChatResult<Option<Conversation>> {
        Ok(self.state.read().await.conversations.get(&conversation_id).cloned())
    }

    async fn save_key_entries(
        &self,
        conversation_id: ConversationId,
        entries: &[SessionKeyEntry],
    ) -> ChatResult<()> {
        let mut state = self.state.write().await;
        if let Some(taken) = entries
            .iter()
            .find(|e| state.session_keys.contains_key(&(conversation_id, e.user_id)))
        {
            return Err(ChatError::validation(format!(
                "user {} already has a session key for conversation {conversation_id}",
                taken.user_id
            )));
        }
        for entry in entries {
            state
                .session_keys
                .insert((conversation_id, entry.user_id), entry.ciphertext.clone());
        }
        Ok(())
    }

    async fn encrypted_key_entry_for(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> ChatResult<Option<String>> {
        let state = self.state.read().await;
        Ok(state.session_keys.get(&(conversation_id, user_id)).cloned())
    }

    async fn touch_last_message(
        &self,
        conversation_id: ConversationId,
        at: OffsetDateTime,
    ) -> ChatResult<()> {
        let mut state = self.state.write().await;
        if let Some(conversation) = state.conversations.get_mut(&conversation_id) {
            if conversation.last_message_at.is_none_or(|last| last < at) {
                conversation.last_message_at = Some(at);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn persist(&self, message: NewMessage) -> ChatResult<Persisted> {
        let mut state = self.state.write().await;
        state.next_message_id += 1;
        let persisted = Persisted {
            id: MessageId(state.next_message_id),
            sent_at: OffsetDateTime::now_utc(),
        };

        state.status_log.push((persisted.id, message.status));
        state.messages.insert(
            persisted.id,
            StoredMessage {
                id: persisted.id,
                conversation_id: message.conversation_id,
                sender_id: message.sender_id,
                content: message.content,
                message_type: message.message_type,
                status: message.status,
                sent_at: persisted.sent_at,
            },
        );
        Ok(persisted)
    }

    async fn get(&self, message_id: MessageId) -> ChatResult<Option<StoredMessage>> {
        Ok(self.state.read().await.messages.get(&message_id).cloned())
    }

    async fn update_status(&self, message_id: MessageId, status: MessageStatus) -> ChatResult<bool> {
        let mut state = self.state.write().await;
        let Some(message) = state.messages.get_mut(&message_id) else {
            return Ok(false);
        };
        if message.status >= status {
            return Ok(false);
        }
        message.status = status;
        state.status_log.push((message_id, status));
        Ok(true)
    }

    async fn record_read(
        &self,
        message_id: MessageId,
        user_id: UserId,
        _at: OffsetDateTime,
    ) -> ChatResult<bool> {
        Ok(self.state.write().await.reads.insert((message_id, user_id)))
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn public_keys_for(&self, user_ids: &[UserId]) -> ChatResult<BTreeMap<UserId, String>> {
        let state = self.state.read().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| {
                let key = state.users.get(id)?.public_key.clone()?;
                Some((*id, key))
            })
            .collect())
    }

    async fn display_info(&self, user_id: UserId) -> ChatResult<Option<DisplayInfo>> {
        Ok(self.state.read().await.users.get(&user_id).map(|u| u.display.clone()))
    }

    async fn push_tokens_for(&self, user_ids: &[UserId]) -> ChatResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| state.users.get(id))
            .flat_map(|user| user.push_tokens.iter().cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[tokio::test]
    async fn expired_and_unknown_credentials_fail() {
        let store = MemoryStore::new();
        store.add_access_token("live", UserId(1), None).await;
        store
            .add_access_token("stale", UserId(2), Some(OffsetDateTime::now_utc() - Duration::minutes(1)))
            .await;

        assert_eq!(store.resolve("live").await.unwrap(), UserId(1));
        for credential in ["stale", "nope", ""] {
            assert!(matches!(
                store.resolve(credential).await,
                Err(ChatError::Authentication(_))
            ));
        }
    }

    #[tokio::test]
    async fn persist_assigns_increasing_ids() {
        let store = MemoryStore::new();
        let message = NewMessage {
            conversation_id: ConversationId(1),
            sender_id: UserId(1),
            content: "x".to_owned(),
            message_type: "Text".to_owned(),
            status: MessageStatus::Sent,
        };
        let first = store.persist(message.clone()).await.unwrap();
        let second = store.persist(message).await.unwrap();
        assert!(second.id > first.id);
        assert!(store.record_read(first.id, UserId(2), first.sent_at).await.unwrap());
        assert!(!store.record_read(first.id, UserId(2), first.sent_at).await.unwrap());
    }
}
