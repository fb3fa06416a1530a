use std::sync::Arc;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use serde::Deserialize;

use crate::error::{ChatError, ChatResult};
use crate::model::UserId;
use crate::store::IdentityVerifier;

#[derive(Debug, Default, Deserialize)]
pub struct CredentialQuery {
    pub access_token: Option<String>,
}

/// Pulls the credential from `?access_token=` first, then from a bearer
/// `Authorization` header.
pub fn presented_credential(query: &CredentialQuery, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query.access_token.as_deref().filter(|t| !t.is_empty()) {
        return Some(token.to_owned());
    }

    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

/// The only place a connection attempt can fail for good.
#[derive(Clone)]
pub struct AuthGate {
    verifier: Arc<dyn IdentityVerifier>,
}

impl AuthGate {
    pub fn new(verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self { verifier }
    }

    pub async fn admit(&self, credential: Option<&str>) -> ChatResult<UserId> {
        let Some(credential) = credential else {
            return Err(ChatError::Authentication("missing credential".to_owned()));
        };

        match self.verifier.resolve(credential).await {
            Ok(user_id) => Ok(user_id),
            Err(err @ ChatError::Authentication(_)) => {
                tracing::info!(error = %err, "rejected connection attempt");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}
