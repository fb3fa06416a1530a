use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

use crate::model::UserId;
use crate::protocol::ServerEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub joined_at: OffsetDateTime,
    sender: UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn open(user_id: UserId) -> (Self, UnboundedReceiver<ServerEvent>) {
        let (sender, rx) = unbounded_channel();
        let handle = Self {
            id: ConnectionId::new(),
            user_id,
            joined_at: OffsetDateTime::now_utc(),
            sender,
        };
        (handle, rx)
    }

    /// False once the connection has gone away.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

#[derive(Default)]
struct Inner {
    by_user: HashMap<UserId, HashMap<ConnectionId, ConnectionHandle>>,
    owners: HashMap<ConnectionId, UserId>,
}

#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent.
    pub async fn register(&self, user_id: UserId, handle: ConnectionHandle) {
        if handle.user_id != user_id {
            tracing::warn!(
                connection_id = %handle.id,
                %user_id,
                handle_user = %handle.user_id,
                "refusing to register a connection under another user"
            );
            return;
        }

        let mut guard = self.inner.write().await;

        match guard.owners.get(&handle.id) {
            Some(owner) if *owner == user_id => return,
            Some(owner) => {
                tracing::warn!(
                    connection_id = %handle.id,
                    %user_id,
                    owner = %owner,
                    "connection already registered to another user"
                );
                return;
            }
            None => {}
        }

        let connection_id = handle.id;
        guard.owners.insert(connection_id, user_id);
        let connections = guard.by_user.entry(user_id).or_default();
        connections.insert(connection_id, handle);

        tracing::debug!(
            %connection_id,
            %user_id,
            devices = connections.len(),
            "registered connection"
        );
    }

    pub async fn unregister(&self, user_id: UserId, connection_id: ConnectionId) {
        let mut guard = self.inner.write().await;

        if guard.owners.get(&connection_id) != Some(&user_id) {
            return;
        }
        guard.owners.remove(&connection_id);

        if let Some(connections) = guard.by_user.get_mut(&user_id) {
            connections.remove(&connection_id);
            let remaining = connections.len();
            if remaining == 0 {
                guard.by_user.remove(&user_id);
            }
            tracing::debug!(%connection_id, %user_id, remaining, "unregistered connection");
        }
    }

    pub async fn connections_for(&self, user_ids: &HashSet<UserId>) -> Vec<ConnectionHandle> {
        let guard = self.inner.read().await;
        user_ids
            .iter()
            .filter_map(|user_id| guard.by_user.get(user_id))
            .flat_map(|connections| connections.values().cloned())
            .collect()
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        let guard = self.inner.read().await;
        guard
            .by_user
            .get(&user_id)
            .is_some_and(|connections| !connections.is_empty())
    }

    /// Snapshot of the given users split into (online handles, offline users)
    /// under a single read lock.
    pub async fn partition(
        &self,
        user_ids: impl IntoIterator<Item = UserId>,
    ) -> (Vec<ConnectionHandle>, Vec<UserId>) {
        let guard = self.inner.read().await;
        let mut online = Vec::new();
        let mut offline = Vec::new();
        for user_id in user_ids {
            match guard.by_user.get(&user_id) {
                Some(connections) if !connections.is_empty() => {
                    online.extend(connections.values().cloned())
                }
                _ => offline.push(user_id),
            }
        }
        (online, offline)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.owners.len()
    }
}
