//! Wires the components together and routes client commands to them.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::auth::{AuthGate, ConversationAuthorizer};
use crate::delivery::MessageRouter;
use crate::error::{ChatError, ChatResult};
use crate::keys::KeyExchangeCoordinator;
use crate::model::UserId;
use crate::protocol::{ClientCommand, ServerEvent};
use crate::push::{PushGateway, PushNotifier};
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::store::{ConversationStore, IdentityVerifier, MessageStore, UserDirectory};
use crate::topics::TopicHub;

/// Who is invoking an operation, and over which connection.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: UserId,
    pub connection: ConnectionHandle,
}

impl Caller {
    pub fn new(connection: ConnectionHandle) -> Self {
        Self {
            user_id: connection.user_id,
            connection,
        }
    }
}

/// The external systems the hub depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentityVerifier>,
    pub conversations: Arc<dyn ConversationStore>,
    pub messages: Arc<dyn MessageStore>,
    pub directory: Arc<dyn UserDirectory>,
    pub push: Arc<dyn PushGateway>,
}

impl Collaborators {
    /// All four stores served by the same backend.
    pub fn from_store<S>(store: S, push: Arc<dyn PushGateway>) -> Self
    where
        S: IdentityVerifier + ConversationStore + MessageStore + UserDirectory + 'static,
    {
        let store = Arc::new(store);
        Self {
            identity: store.clone(),
            conversations: store.clone(),
            messages: store.clone(),
            directory: store,
            push,
        }
    }
}

#[derive(Clone)]
pub struct Hub {
    pub gate: AuthGate,
    pub registry: ConnectionRegistry,
    pub topics: TopicHub,
    pub router: MessageRouter,
    pub keys: KeyExchangeCoordinator,
}

impl Hub {
    pub fn new(collaborators: Collaborators, push_preview_chars: usize) -> Self {
        let Collaborators {
            identity,
            conversations,
            messages,
            directory,
            push,
        } = collaborators;

        let registry = ConnectionRegistry::new();
        let topics = TopicHub::new();
        let authorizer = ConversationAuthorizer::new(conversations.clone());
        let notifier = PushNotifier::new(push, push_preview_chars);

        Self {
            gate: AuthGate::new(identity),
            router: MessageRouter::new(
                registry.clone(),
                authorizer.clone(),
                conversations.clone(),
                messages,
                directory.clone(),
                notifier,
            ),
            keys: KeyExchangeCoordinator::new(authorizer, conversations, directory, topics.clone()),
            registry,
            topics,
        }
    }

    /// Registers a fresh connection for an already admitted user.
    pub async fn connect(&self, user_id: UserId) -> (Caller, UnboundedReceiver<ServerEvent>) {
        let (handle, rx) = ConnectionHandle::open(user_id);
        self.registry.register(user_id, handle.clone()).await;
        let connections = self.registry.connection_count().await;
        tracing::info!(connection_id = %handle.id, %user_id, connections, "connection opened");
        (Caller::new(handle), rx)
    }

    pub async fn disconnect(&self, caller: &Caller) {
        self.registry.unregister(caller.user_id, caller.connection.id).await;
        self.topics.unsubscribe_all(caller.connection.id).await;
        let connected_for = OffsetDateTime::now_utc() - caller.connection.joined_at;
        tracing::info!(
            connection_id = %caller.connection.id,
            user_id = %caller.user_id,
            %connected_for,
            "connection closed"
        );
    }

    /// Runs one command. A failure is also reported to the invoking
    /// connection as an `Error` event; the connection stays open.
    pub async fn dispatch(&self, caller: &Caller, command: ClientCommand) -> ChatResult<()> {
        let op = command.name();
        let result = match command {
            ClientCommand::SendMessage {
                conversation_id,
                sender_id,
                content,
                message_type,
            } => self
                .router
                .send_message(caller, conversation_id, sender_id, content, message_type)
                .await
                .map(drop),
            ClientCommand::Typing {
                conversation_id,
                sender_id,
            } => self
                .router
                .typing(caller, conversation_id, sender_id)
                .await
                .map(drop),
            ClientCommand::JoinConversation { conversation_id } => self
                .keys
                .join_conversation(caller, conversation_id)
                .await
                .map(drop),
            ClientCommand::MarkRead { message_id } => {
                self.router.mark_read(caller, message_id).await.map(drop)
            }
        };

        if let Err(err) = &result {
            if let ChatError::Store(source) = err {
                tracing::error!(op, error = ?source, "collaborator failure");
            }
            tracing::info!(
                op,
                connection_id = %caller.connection.id,
                user_id = %caller.user_id,
                error = %err,
                "operation rejected"
            );
            caller.connection.send(ServerEvent::failure(Some(op), err));
        }
        result
    }
}
