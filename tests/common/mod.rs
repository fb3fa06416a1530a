#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc::UnboundedReceiver, Mutex};
use whisperhub::{
    hub::Caller,
    model::{Conversation, ConversationId, ConversationKind, UserId},
    protocol::ServerEvent,
    push::{PushGateway, PushMessage, TokenResult},
    store::MemoryStore,
    Collaborators, Hub,
};

#[derive(Default)]
pub struct RecordingGateway {
    pub calls: Mutex<Vec<(Vec<String>, PushMessage)>>,
    pub failing: Vec<String>,
}

#[async_trait]
impl PushGateway for RecordingGateway {
    async fn send_multicast(&self, tokens: &[String], message: &PushMessage) -> Vec<TokenResult> {
        self.calls.lock().await.push((tokens.to_vec(), message.clone()));
        tokens
            .iter()
            .map(|t| {
                if self.failing.contains(t) {
                    TokenResult::failed(t.as_str(), "not registered")
                } else {
                    TokenResult::ok(t.as_str())
                }
            })
            .collect()
    }
}

pub struct World {
    pub hub: Hub,
    pub store: MemoryStore,
    pub push: Arc<RecordingGateway>,
}

pub fn conversation(id: i64, kind: ConversationKind, participants: &[i64]) -> Conversation {
    Conversation {
        id: ConversationId(id),
        kind,
        name: format!("conversation {id}"),
        participants: participants.iter().copied().map(UserId).collect(),
        last_message_at: None,
    }
}

impl World {
    pub async fn new() -> Self {
        Self::with_gateway(RecordingGateway::default()).await
    }

    /// Users 1-4 exist; conversation 42 is a group of {1, 2, 3}.
    pub async fn with_gateway(gateway: RecordingGateway) -> Self {
        let store = MemoryStore::new();
        store.add_user(UserId(1), "Ana", None, Some("pk-1")).await;
        store.add_user(UserId(2), "Binh", Some("https://img/2.png"), Some("pk-2")).await;
        store.add_user(UserId(3), "Chi", None, Some("pk-3")).await;
        store.add_user(UserId(4), "Dung", None, Some("pk-4")).await;
        store.add_push_token(UserId(3), "tok-3-phone").await;
        store.add_push_token(UserId(3), "tok-3-tablet").await;
        store.add_push_token(UserId(1), "tok-1").await;
        store
            .add_conversation(conversation(42, ConversationKind::Group, &[1, 2, 3]))
            .await;

        let push = Arc::new(gateway);
        let hub = Hub::new(Collaborators::from_store(store.clone(), push.clone()), 100);
        Self { hub, store, push }
    }

    pub async fn connect(&self, user_id: i64) -> (Caller, UnboundedReceiver<ServerEvent>) {
        self.hub.connect(UserId(user_id)).await
    }
}

pub fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
