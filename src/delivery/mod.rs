//! Message routing: persist once, fan out to every live connection, fall
//! back to push for whoever is offline.

mod read;
mod send;
mod typing;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::auth::ConversationAuthorizer;
use crate::error::{ChatError, ChatResult, Missing};
use crate::hub::Caller;
use crate::model::{ConversationId, DisplayInfo, UserId};
use crate::protocol::ServerEvent;
use crate::push::PushNotifier;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::store::{ConversationStore, MessageStore, UserDirectory};

pub use send::SendReceipt;

/// Serialises persistence and live fan-out per conversation so every
/// connection sees messages in persistence order.
#[derive(Default, Clone)]
struct ConversationLocks {
    locks: Arc<Mutex<HashMap<ConversationId, Arc<Mutex<()>>>>>,
}

impl ConversationLocks {
    async fn acquire(&self, conversation_id: ConversationId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // forget locks nobody holds or waits on
            locks.retain(|id, lock| *id == conversation_id || Arc::strong_count(lock) > 1);
            locks.entry(conversation_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Clone)]
pub struct MessageRouter {
    registry: ConnectionRegistry,
    authorizer: ConversationAuthorizer,
    conversations: Arc<dyn ConversationStore>,
    messages: Arc<dyn MessageStore>,
    directory: Arc<dyn UserDirectory>,
    notifier: PushNotifier,
    locks: ConversationLocks,
}

impl MessageRouter {
    pub fn new(
        registry: ConnectionRegistry,
        authorizer: ConversationAuthorizer,
        conversations: Arc<dyn ConversationStore>,
        messages: Arc<dyn MessageStore>,
        directory: Arc<dyn UserDirectory>,
        notifier: PushNotifier,
    ) -> Self {
        Self {
            registry,
            authorizer,
            conversations,
            messages,
            directory,
            notifier,
            locks: ConversationLocks::default(),
        }
    }

    async fn display_info(&self, user_id: UserId) -> ChatResult<DisplayInfo> {
        self.directory
            .display_info(user_id)
            .await?
            .ok_or(ChatError::NotFound(Missing::User(user_id)))
    }

    /// Every live connection of every participant, senders included.
    async fn participant_connections(&self, participants: &[UserId]) -> Vec<ConnectionHandle> {
        let users: HashSet<UserId> = participants.iter().copied().collect();
        self.registry.connections_for(&users).await
    }
}

/// The sender id a client names must be the one it authenticated as.
fn claimed_identity(
    caller: &Caller,
    conversation_id: ConversationId,
    claimed: UserId,
) -> ChatResult<()> {
    if claimed != caller.user_id {
        tracing::warn!(
            connection_id = %caller.connection.id,
            user_id = %caller.user_id,
            %claimed,
            %conversation_id,
            "client acted under another user's id"
        );
        return Err(ChatError::Authorization { user_id: caller.user_id, conversation_id });
    }
    Ok(())
}

/// Queues the event on each connection independently. Returns how many
/// connections accepted it.
fn fan_out(connections: &[ConnectionHandle], event: &ServerEvent) -> usize {
    let mut delivered = 0;
    for connection in connections {
        if connection.send(event.clone()) {
            delivered += 1;
        } else {
            tracing::debug!(
                connection_id = %connection.id,
                user_id = %connection.user_id,
                "connection closed before delivery"
            );
        }
    }
    delivered
}
