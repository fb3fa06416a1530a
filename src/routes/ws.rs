use axum::{
    debug_handler,
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};

use crate::{
    auth::{presented_credential, CredentialQuery},
    error::ChatError,
    hub::{Caller, Hub},
    model::UserId,
    protocol::{ClientCommand, ServerEvent},
    AppResult,
};

#[debug_handler(state = crate::AppState)]
pub async fn hub_ws(
    State(hub): State<Hub>,
    Query(query): Query<CredentialQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> AppResult<Response> {
    let credential = presented_credential(&query, &headers);
    let user_id = hub.gate.admit(credential.as_deref()).await?;
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    Ok(ws
        .on_upgrade(move |socket| run_connection(hub, user_id, socket))
        .into_response())
}

async fn run_connection(hub: Hub, user_id: UserId, socket: WebSocket) {
    let (caller, mut rx) = hub.connect(user_id).await;
    let (mut sender, mut receiver) = socket.split();

    let connection_id = caller.connection.id;
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    tracing::error!(%connection_id, error = %err, "could not encode event");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // commands run inline so a client disconnect never cancels one mid-flight
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => handle_frame(&hub, &caller, text.as_str()).await,
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => handle_frame(&hub, &caller, text).await,
                Err(_) => reject_frame(&caller, "frame is not UTF-8"),
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }

        if writer.is_finished() {
            break;
        }
    }

    hub.disconnect(&caller).await;
    writer.abort();
}

async fn handle_frame(hub: &Hub, caller: &Caller, text: &str) {
    let command = match serde_json::from_str::<ClientCommand>(text) {
        Ok(command) => command,
        Err(err) => return reject_frame(caller, &format!("malformed command: {err}")),
    };

    // the failure already went back to the client as an Error event
    let _ = hub.dispatch(caller, command).await;
}

fn reject_frame(caller: &Caller, reason: &str) {
    tracing::debug!(connection_id = %caller.connection.id, reason, "rejected frame");
    caller
        .connection
        .send(ServerEvent::failure(None, &ChatError::validation(reason)));
}
