use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::model::ConversationId;
use crate::registry::ConnectionId;

#[derive(Default)]
struct Inner {
    members: HashMap<ConversationId, HashSet<ConnectionId>>,
    joined: HashMap<ConnectionId, HashSet<ConversationId>>,
}

/// One topic per conversation, holding the connections that joined it.
#[derive(Default, Clone)]
pub struct TopicHub {
    inner: Arc<RwLock<Inner>>,
}

impl TopicHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the connection was already subscribed.
    pub async fn subscribe(&self, conversation_id: ConversationId, connection_id: ConnectionId) -> bool {
        let mut guard = self.inner.write().await;
        let added = guard.members.entry(conversation_id).or_default().insert(connection_id);
        guard.joined.entry(connection_id).or_default().insert(conversation_id);
        added
    }

    /// Drops every subscription of a closed connection.
    pub async fn unsubscribe_all(&self, connection_id: ConnectionId) {
        let mut guard = self.inner.write().await;
        let Some(conversations) = guard.joined.remove(&connection_id) else {
            return;
        };

        for conversation_id in conversations {
            if let Some(members) = guard.members.get_mut(&conversation_id) {
                members.remove(&connection_id);
                if members.is_empty() {
                    guard.members.remove(&conversation_id);
                }
            }
        }
    }

    pub async fn subscribers(&self, conversation_id: ConversationId) -> HashSet<ConnectionId> {
        let guard = self.inner.read().await;
        guard.members.get(&conversation_id).cloned().unwrap_or_default()
    }

    pub async fn is_subscribed(&self, conversation_id: ConversationId, connection_id: ConnectionId) -> bool {
        let guard = self.inner.read().await;
        guard
            .members
            .get(&conversation_id)
            .is_some_and(|members| members.contains(&connection_id))
    }
}
