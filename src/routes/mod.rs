mod keys;
mod ws;

use axum::{routing::{get, post}, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/hub", get(ws::hub_ws))
        .route("/conversations/{conversation_id}/keys", post(keys::create_keys))
        .route("/health", get(health))
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::{
        app,
        model::{Conversation, ConversationId, ConversationKind, UserId},
        push::NoopPushGateway,
        store::MemoryStore,
        AppState, Collaborators, Config, Hub,
    };

    async fn state() -> AppState {
        let store = MemoryStore::new();
        for (id, name) in [(1, "Ana"), (2, "Binh"), (4, "Dung")] {
            store.add_user(UserId(id), name, None, None).await;
        }
        store.add_access_token("ana", UserId(1), None).await;
        store.add_access_token("dung", UserId(4), None).await;
        store
            .add_conversation(Conversation {
                id: ConversationId(42),
                kind: ConversationKind::Private,
                name: String::new(),
                participants: vec![UserId(1), UserId(2)],
                last_message_at: None,
            })
            .await;

        let hub = Hub::new(Collaborators::from_store(store, Arc::new(NoopPushGateway)), 100);
        let config = Config {
            bind_addr: ([127, 0, 0, 1], 0).into(),
            database_url: "sqlite::memory:".to_owned(),
            database_max_connections: 1,
            push_endpoint: None,
            push_server_key: None,
            push_preview_chars: 100,
            cors_allow_origin: None,
        };
        AppState { hub, config: Arc::new(config) }
    }

    async fn call(state: &AppState, request: Request<Body>) -> Response {
        app(state.clone()).unwrap().oneshot(request).await.unwrap()
    }

    fn post_keys(token: &str, body: Value) -> Request<Body> {
        Request::post("/conversations/42/keys")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn upgrade(uri: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn hub_refuses_bad_credentials_before_registering() {
        let state = state().await;

        for uri in ["/hub", "/hub?access_token=nope"] {
            let response = call(&state, upgrade(uri)).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
        assert_eq!(state.hub.registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn hub_needs_an_upgradable_connection() {
        let state = state().await;

        // oneshot requests carry no hyper upgrade handle
        let response = call(&state, upgrade("/hub?access_token=ana")).await;
        assert!(response.status().is_client_error());
        assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.hub.registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn keys_are_created_once() {
        let state = state().await;
        let body = json!({
            "encryptedSessionKeys": [
                { "userId": 1, "encryptedSessionKey": "ct-1" },
                { "userId": 2, "encryptedSessionKey": "ct-2" },
            ]
        });

        let response = call(&state, post_keys("ana", body.clone())).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let created: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(created, json!({ "conversationId": 42, "stored": 2 }));

        let response = call(&state, post_keys("ana", body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn keys_route_checks_the_caller() {
        let state = state().await;
        let body = json!({ "encryptedSessionKeys": [{ "userId": 1, "encryptedSessionKey": "ct-1" }] });

        assert_eq!(
            call(&state, post_keys("nope", body.clone())).await.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            call(&state, post_keys("dung", body)).await.status(),
            StatusCode::FORBIDDEN
        );
    }

    #[tokio::test]
    async fn health_answers() {
        let state = state().await;
        let response = call(&state, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
