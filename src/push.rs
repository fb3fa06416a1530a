//! Push fallback for recipients with no live connection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryReport;
use crate::model::{ConversationId, MessageId, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResult {
    pub token: String,
    pub error: Option<String>,
}

impl TokenResult {
    pub fn ok(token: impl Into<String>) -> Self {
        Self { token: token.into(), error: None }
    }

    pub fn failed(token: impl Into<String>, error: impl Into<String>) -> Self {
        Self { token: token.into(), error: Some(error.into()) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: HashMap<String, String>,
}

#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send_multicast(&self, tokens: &[String], message: &PushMessage) -> Vec<TokenResult>;
}

#[derive(Serialize)]
struct FcmRequest<'a> {
    message: FcmMessage<'a>,
}

#[derive(Serialize)]
struct FcmMessage<'a> {
    token: &'a str,
    notification: FcmNotification<'a>,
    data: &'a HashMap<String, String>,
}

#[derive(Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Deserialize)]
struct FcmResponse {
    #[allow(dead_code)]
    name: Option<String>,
}

/// One FCM-style POST per token.
pub struct HttpPushGateway {
    endpoint: String,
    server_key: Option<String>,
    http_client: reqwest::Client,
}

impl HttpPushGateway {
    pub fn new(endpoint: String, server_key: Option<String>) -> Self {
        Self {
            endpoint,
            server_key,
            http_client: reqwest::Client::new(),
        }
    }

    async fn send_one(&self, token: &str, message: &PushMessage) -> Result<(), String> {
        let body = FcmRequest {
            message: FcmMessage {
                token,
                notification: FcmNotification {
                    title: &message.title,
                    body: &message.body,
                },
                data: &message.data,
            },
        };

        let mut request = self.http_client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.server_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("push request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("push gateway error: {status} - {text}"));
        }

        response
            .json::<FcmResponse>()
            .await
            .map_err(|e| format!("unreadable push response: {e}"))?;
        Ok(())
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn send_multicast(&self, tokens: &[String], message: &PushMessage) -> Vec<TokenResult> {
        let sends = tokens.iter().map(|token| async move {
            match self.send_one(token, message).await {
                Ok(()) => TokenResult::ok(token.as_str()),
                Err(e) => TokenResult::failed(token.as_str(), e),
            }
        });
        futures_util::future::join_all(sends).await
    }
}

pub struct NoopPushGateway;

#[async_trait]
impl PushGateway for NoopPushGateway {
    async fn send_multicast(&self, tokens: &[String], message: &PushMessage) -> Vec<TokenResult> {
        tracing::info!(tokens = tokens.len(), title = %message.title, "push disabled, dropping notification");
        tokens.iter().map(|t| TokenResult::ok(t.as_str())).collect()
    }
}

/// Truncates on a char boundary, adding an ellipsis when cut.
pub fn preview(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_owned();
    }
    let keep = max_chars.saturating_sub(3);
    let mut truncated: String = content.chars().take(keep).collect();
    truncated.push_str("...");
    truncated
}

pub struct NewMessageNotice<'a> {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub sender_name: &'a str,
    pub content: &'a str,
}

#[derive(Clone)]
pub struct PushNotifier {
    gateway: Arc<dyn PushGateway>,
    preview_chars: usize,
}

impl PushNotifier {
    pub fn new(gateway: Arc<dyn PushGateway>, preview_chars: usize) -> Self {
        Self { gateway, preview_chars }
    }

    pub fn build_message(&self, notice: &NewMessageNotice<'_>) -> PushMessage {
        PushMessage {
            title: notice.sender_name.to_owned(),
            body: preview(notice.content, self.preview_chars),
            data: HashMap::from([
                ("conversationId".to_owned(), notice.conversation_id.to_string()),
                ("messageId".to_owned(), notice.message_id.to_string()),
                ("senderId".to_owned(), notice.sender_id.to_string()),
            ]),
        }
    }

    pub async fn notify(&self, tokens: Vec<String>, notice: &NewMessageNotice<'_>) -> DeliveryReport {
        if tokens.is_empty() {
            return DeliveryReport::default();
        }

        let message = self.build_message(notice);
        let results = self.gateway.send_multicast(&tokens, &message).await;

        let report = DeliveryReport {
            attempted: tokens.len(),
            failed: results
                .into_iter()
                .filter_map(|r| r.error.map(|e| (r.token, e)))
                .collect(),
        };

        for (token, reason) in &report.failed {
            tracing::warn!(
                message_id = %notice.message_id,
                conversation_id = %notice.conversation_id,
                token = %token,
                reason = %reason,
                "push delivery failed"
            );
        }
        tracing::debug!(
            message_id = %notice.message_id,
            attempted = report.attempted,
            delivered = report.delivered(),
            "push fallback sent"
        );

        report
    }
}
