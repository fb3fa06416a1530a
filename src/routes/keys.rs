use axum::{
    debug_handler,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    auth::{presented_credential, CredentialQuery},
    hub::Hub,
    model::{ConversationId, SessionKeyEntry},
    AppResult,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateKeysRequest {
    encrypted_session_keys: Vec<SessionKeyEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateKeysResponse {
    conversation_id: ConversationId,
    stored: usize,
}

/// Called by the conversation creator once it has encrypted the session key
/// for each participant.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn create_keys(
    State(hub): State<Hub>,
    Path(conversation_id): Path<ConversationId>,
    Query(query): Query<CredentialQuery>,
    headers: HeaderMap,
    Json(CreateKeysRequest { encrypted_session_keys }): Json<CreateKeysRequest>,
) -> AppResult<(StatusCode, Json<CreateKeysResponse>)> {
    let credential = presented_credential(&query, &headers);
    let requester_id = hub.gate.admit(credential.as_deref()).await?;

    let stored = hub
        .keys
        .create_conversation_keys(requester_id, conversation_id, encrypted_session_keys)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateKeysResponse { conversation_id, stored }),
    ))
}
