use axum::{http::StatusCode, response::{IntoResponse, Response}};

use crate::error::ChatError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<ChatError>() {
            Some(ChatError::Authentication(_)) => StatusCode::UNAUTHORIZED,
            Some(ChatError::Authorization { .. }) => StatusCode::FORBIDDEN,
            Some(ChatError::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(ChatError::Validation(_)) => StatusCode::BAD_REQUEST,
            Some(ChatError::Store(_)) | None => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = ?self.0, "request failed");
            return (status, "internal server error").into_response();
        }

        (status, self.0.to_string()).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Missing;
    use crate::model::{ConversationId, UserId};

    fn status_of(err: ChatError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn chat_errors_map_to_statuses() {
        assert_eq!(status_of(ChatError::Authentication("bad".to_owned())), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_of(ChatError::Authorization {
                user_id: UserId(1),
                conversation_id: ConversationId(2)
            }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(ChatError::NotFound(Missing::Conversation(ConversationId(2)))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status_of(ChatError::validation("empty")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(ChatError::Store(anyhow::anyhow!("disk full"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError(anyhow::anyhow!("anything else")).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn server_errors_hide_their_cause() {
        let response = AppError::from(ChatError::Store(anyhow::anyhow!("password=hunter2"))).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"internal server error");
    }
}
