use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use time::OffsetDateTime;

use crate::error::{ChatError, ChatResult};
use crate::model::{
    Conversation, ConversationId, ConversationKind, DisplayInfo, MessageId, MessageStatus,
    NewMessage, Persisted, SessionKeyEntry, StoredMessage, UserId,
};

use super::{ConversationStore, IdentityVerifier, MessageStore, UserDirectory};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    display_name TEXT NOT NULL,
    avatar_url TEXT,
    public_key TEXT
);
CREATE TABLE IF NOT EXISTS access_tokens (
    token TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id),
    expires_at INTEGER
);
CREATE TABLE IF NOT EXISTS push_tokens (
    user_id INTEGER NOT NULL REFERENCES users(id),
    token TEXT NOT NULL,
    UNIQUE (user_id, token)
);
CREATE TABLE IF NOT EXISTS conversations (
    id INTEGER PRIMARY KEY,
    kind TEXT NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    last_message_at INTEGER
);
CREATE TABLE IF NOT EXISTS participants (
    conversation_id INTEGER NOT NULL REFERENCES conversations(id),
    user_id INTEGER NOT NULL REFERENCES users(id),
    PRIMARY KEY (conversation_id, user_id)
);
CREATE TABLE IF NOT EXISTS session_keys (
    conversation_id INTEGER NOT NULL REFERENCES conversations(id),
    user_id INTEGER NOT NULL,
    ciphertext TEXT NOT NULL,
    PRIMARY KEY (conversation_id, user_id)
);
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id INTEGER NOT NULL REFERENCES conversations(id),
    sender_id INTEGER NOT NULL,
    content TEXT NOT NULL,
    message_type TEXT NOT NULL,
    status TEXT NOT NULL,
    sent_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS messages_by_conversation ON messages (conversation_id, id);
CREATE TABLE IF NOT EXISTS message_reads (
    message_id INTEGER NOT NULL REFERENCES messages(id),
    user_id INTEGER NOT NULL,
    read_at INTEGER NOT NULL,
    PRIMARY KEY (message_id, user_id)
);
"#;

fn to_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_millis(millis: i64) -> ChatResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .map_err(|err| ChatError::Store(err.into()))
}

fn status_rank(status: MessageStatus) -> i64 {
    match status {
        MessageStatus::Sent => 0,
        MessageStatus::Received => 1,
        MessageStatus::Read => 2,
    }
}

fn now_truncated() -> OffsetDateTime {
    // sub-millisecond precision would not survive a round trip
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(now.millisecond() as u32 * 1_000_000).unwrap_or(now)
}

/// All collaborators backed by one SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl IdentityVerifier for SqliteStore {
    async fn resolve(&self, credential: &str) -> ChatResult<UserId> {
        if credential.is_empty() {
            return Err(ChatError::Authentication("missing credential".to_owned()));
        }

        let row: Option<(i64, Option<i64>)> =
            sqlx::query_as("SELECT user_id,expires_at FROM access_tokens WHERE token=?")
                .bind(credential)
                .fetch_optional(&self.pool)
                .await?;

        let Some((user_id, expires_at)) = row else {
            return Err(ChatError::Authentication("unknown credential".to_owned()));
        };

        if let Some(expires_at) = expires_at {
            if from_millis(expires_at)? <= OffsetDateTime::now_utc() {
                return Err(ChatError::Authentication("credential expired".to_owned()));
            }
        }

        Ok(UserId(user_id))
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn get(&self, conversation_id: ConversationId) -> ChatResult<Option<Conversation>> {
        let row: Option<(String, String, Option<i64>)> =
            sqlx::query_as("SELECT kind,name,last_message_at FROM conversations WHERE id=?")
                .bind(conversation_id.0)
                .fetch_optional(&self.pool)
                .await?;

        let Some((kind, name, last_message_at)) = row else {
            return Ok(None);
        };

        let kind = ConversationKind::parse(&kind).ok_or_else(|| {
            ChatError::Store(anyhow::anyhow!(
                "conversation {conversation_id} has unknown kind {kind:?}"
            ))
        })?;

        let participants: Vec<(i64,)> = sqlx::query_as(
            "SELECT user_id FROM participants WHERE conversation_id=? ORDER BY user_id",
        )
        .bind(conversation_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Conversation {
            id: conversation_id,
            kind,
            name,
            participants: participants.into_iter().map(|(id,)| UserId(id)).collect(),
            last_message_at: last_message_at.map(from_millis).transpose()?,
        }))
    }

    async fn save_key_entries(
        &self,
        conversation_id: ConversationId,
        entries: &[SessionKeyEntry],
    ) -> ChatResult<()> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            let taken: Option<(i64,)> = sqlx::query_as(
                "SELECT user_id FROM session_keys WHERE conversation_id=? AND user_id=?",
            )
            .bind(conversation_id.0)
            .bind(entry.user_id.0)
            .fetch_optional(&mut *tx)
            .await?;
            if taken.is_some() {
                return Err(ChatError::validation(format!(
                    "user {} already has a session key for conversation {conversation_id}",
                    entry.user_id
                )));
            }

            sqlx::query(
                "INSERT INTO session_keys (conversation_id,user_id,ciphertext) VALUES (?,?,?)",
            )
            .bind(conversation_id.0)
            .bind(entry.user_id.0)
            .bind(&entry.ciphertext)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn encrypted_key_entry_for(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> ChatResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT ciphertext FROM session_keys WHERE conversation_id=? AND user_id=?",
        )
        .bind(conversation_id.0)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(ciphertext,)| ciphertext))
    }

    async fn touch_last_message(
        &self,
        conversation_id: ConversationId,
        at: OffsetDateTime,
    ) -> ChatResult<()> {
        let at = to_millis(at);
        sqlx::query(
            "UPDATE conversations SET last_message_at=? WHERE id=? AND (last_message_at IS NULL OR last_message_at<?)",
        )
        .bind(at)
        .bind(conversation_id.0)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn persist(&self, message: NewMessage) -> ChatResult<Persisted> {
        let sent_at = now_truncated();
        let result = sqlx::query(
            "INSERT INTO messages (conversation_id,sender_id,content,message_type,status,sent_at) VALUES (?,?,?,?,?,?)",
        )
        .bind(message.conversation_id.0)
        .bind(message.sender_id.0)
        .bind(&message.content)
        .bind(&message.message_type)
        .bind(message.status.as_str())
        .bind(to_millis(sent_at))
        .execute(&self.pool)
        .await?;

        Ok(Persisted {
            id: MessageId(result.last_insert_rowid()),
            sent_at,
        })
    }

    async fn get(&self, message_id: MessageId) -> ChatResult<Option<StoredMessage>> {
        let row: Option<(i64, i64, String, String, String, i64)> = sqlx::query_as(
            "SELECT conversation_id,sender_id,content,message_type,status,sent_at FROM messages WHERE id=?",
        )
        .bind(message_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some((conversation_id, sender_id, content, message_type, status, sent_at)) = row else {
            return Ok(None);
        };

        let status = MessageStatus::parse(&status).ok_or_else(|| {
            ChatError::Store(anyhow::anyhow!("message {message_id} has unknown status {status:?}"))
        })?;

        Ok(Some(StoredMessage {
            id: message_id,
            conversation_id: ConversationId(conversation_id),
            sender_id: UserId(sender_id),
            content,
            message_type,
            status,
            sent_at: from_millis(sent_at)?,
        }))
    }

    async fn update_status(&self, message_id: MessageId, status: MessageStatus) -> ChatResult<bool> {
        let result = sqlx::query(
            "UPDATE messages SET status=? WHERE id=?
             AND (CASE status WHEN 'Sent' THEN 0 WHEN 'Received' THEN 1 ELSE 2 END) < ?",
        )
        .bind(status.as_str())
        .bind(message_id.0)
        .bind(status_rank(status))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_read(
        &self,
        message_id: MessageId,
        user_id: UserId,
        at: OffsetDateTime,
    ) -> ChatResult<bool> {
        let result = sqlx::query(
            "INSERT INTO message_reads (message_id,user_id,read_at) VALUES (?,?,?) ON CONFLICT DO NOTHING",
        )
        .bind(message_id.0)
        .bind(user_id.0)
        .bind(to_millis(at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

fn in_list<'a>(builder: &mut QueryBuilder<'a, Sqlite>, user_ids: &'a [UserId]) {
    builder.push(" IN (");
    let mut separated = builder.separated(",");
    for user_id in user_ids {
        separated.push_bind(user_id.0);
    }
    separated.push_unseparated(")");
}

#[async_trait]
impl UserDirectory for SqliteStore {
    async fn public_keys_for(&self, user_ids: &[UserId]) -> ChatResult<BTreeMap<UserId, String>> {
        if user_ids.is_empty() {
            return Ok(BTreeMap::new());
        }

        let mut builder = QueryBuilder::new("SELECT id,public_key FROM users WHERE public_key IS NOT NULL AND id");
        in_list(&mut builder, user_ids);
        let rows = builder.build_query_as::<(i64, String)>().fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(|(id, key)| (UserId(id), key)).collect())
    }

    async fn display_info(&self, user_id: UserId) -> ChatResult<Option<DisplayInfo>> {
        let row: Option<(String, Option<String>)> =
            sqlx::query_as("SELECT display_name,avatar_url FROM users WHERE id=?")
                .bind(user_id.0)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(name, avatar_url)| DisplayInfo { name, avatar_url }))
    }

    async fn push_tokens_for(&self, user_ids: &[UserId]) -> ChatResult<Vec<String>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::new("SELECT token FROM push_tokens WHERE user_id");
        in_list(&mut builder, user_ids);
        let rows = builder.build_query_as::<(String,)>().fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(|(token,)| token).collect())
    }
}
