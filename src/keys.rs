//! The server only relays key material; it never sees a session key.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::auth::ConversationAuthorizer;
use crate::error::{ChatError, ChatResult, Missing};
use crate::hub::Caller;
use crate::model::{ConversationId, SessionKeyEntry, UserId};
use crate::protocol::ServerEvent;
use crate::store::{ConversationStore, UserDirectory};
use crate::topics::TopicHub;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBundle {
    pub public_keys: BTreeMap<UserId, String>,
    pub session_key_entry: SessionKeyEntry,
}

impl From<KeyBundle> for ServerEvent {
    fn from(bundle: KeyBundle) -> Self {
        ServerEvent::ReceivePublicKeysAndSessionKey {
            public_keys: bundle.public_keys,
            session_key_entry: bundle.session_key_entry,
        }
    }
}

#[derive(Clone)]
pub struct KeyExchangeCoordinator {
    authorizer: ConversationAuthorizer,
    conversations: Arc<dyn ConversationStore>,
    directory: Arc<dyn UserDirectory>,
    topics: TopicHub,
}

impl KeyExchangeCoordinator {
    pub fn new(
        authorizer: ConversationAuthorizer,
        conversations: Arc<dyn ConversationStore>,
        directory: Arc<dyn UserDirectory>,
        topics: TopicHub,
    ) -> Self {
        Self {
            authorizer,
            conversations,
            directory,
            topics,
        }
    }

    /// Entries are write-once per participant.
    pub async fn create_conversation_keys(
        &self,
        requester_id: UserId,
        conversation_id: ConversationId,
        entries: Vec<SessionKeyEntry>,
    ) -> ChatResult<usize> {
        let conversation = self
            .authorizer
            .require_participant(conversation_id, requester_id)
            .await?;

        if entries.is_empty() {
            return Err(ChatError::validation("no session key entries supplied"));
        }

        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.user_id) {
                return Err(ChatError::validation(format!(
                    "user {} has more than one session key entry",
                    entry.user_id
                )));
            }
            if !conversation.has_participant(entry.user_id) {
                return Err(ChatError::validation(format!(
                    "user {} is not a participant of conversation {conversation_id}",
                    entry.user_id
                )));
            }
            if entry.ciphertext.is_empty() {
                return Err(ChatError::validation(format!(
                    "empty ciphertext for user {}",
                    entry.user_id
                )));
            }
        }

        let missing = conversation.participants.len().saturating_sub(entries.len());
        if missing > 0 {
            tracing::warn!(
                %conversation_id,
                missing,
                "session keys stored for only part of the participants"
            );
        }

        self.conversations
            .save_key_entries(conversation_id, &entries)
            .await?;

        tracing::info!(%conversation_id, entries = entries.len(), "stored session key entries");
        Ok(entries.len())
    }

    pub async fn join_conversation(
        &self,
        caller: &Caller,
        conversation_id: ConversationId,
    ) -> ChatResult<KeyBundle> {
        let requester_id = caller.user_id;
        let conversation = self
            .authorizer
            .require_participant(conversation_id, requester_id)
            .await?;

        let others: Vec<UserId> = conversation.others(requester_id).collect();
        let mut public_keys = self.directory.public_keys_for(&others).await?;
        public_keys.remove(&requester_id);
        if public_keys.len() < others.len() {
            tracing::debug!(
                %conversation_id,
                without_key = others.len() - public_keys.len(),
                "some participants have no public key"
            );
        }

        let Some(ciphertext) = self
            .conversations
            .encrypted_key_entry_for(conversation_id, requester_id)
            .await?
        else {
            tracing::warn!(
                %conversation_id,
                user_id = %requester_id,
                "participant has no session key entry"
            );
            return Err(ChatError::NotFound(Missing::SessionKey(conversation_id, requester_id)));
        };

        if self.topics.subscribe(conversation_id, caller.connection.id).await {
            tracing::debug!(
                %conversation_id,
                connection_id = %caller.connection.id,
                "connection joined conversation topic"
            );
        }

        let bundle = KeyBundle {
            public_keys,
            session_key_entry: SessionKeyEntry {
                user_id: requester_id,
                ciphertext,
            },
        };
        caller.connection.send(bundle.clone().into());

        Ok(bundle)
    }
}
