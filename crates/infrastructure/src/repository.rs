use application::MessageRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Message, MessageId, RepositoryError, UserId};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "id, sender_id, recipient_id, text, file, edited, created_at";

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    sender_id: Uuid,
    recipient_id: Uuid,
    text: Option<String>,
    file: Option<String>,
    edited: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        if value.text.is_none() && value.file.is_none() {
            return Err(RepositoryError::storage(format!(
                "message {} has neither text nor file",
                value.id
            )));
        }

        Ok(Message {
            id: MessageId::from(value.id),
            sender_id: UserId::from(value.sender_id),
            recipient_id: UserId::from(value.recipient_id),
            text: value.text,
            file: value.file,
            edited: value.edited,
            created_at: value.created_at,
        })
    }
}

pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create(&self, message: Message) -> Result<Message, RepositoryError> {
        let query = format!(
            "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {MESSAGE_COLUMNS}"
        );
        let record = sqlx::query_as::<_, MessageRecord>(&query)
            .bind(Uuid::from(message.id))
            .bind(Uuid::from(message.sender_id))
            .bind(Uuid::from(message.recipient_id))
            .bind(message.text.as_deref())
            .bind(message.file.as_deref())
            .bind(message.edited)
            .bind(message.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Message::try_from(record)
    }

    async fn find_between(
        &self,
        participant_a: UserId,
        participant_b: UserId,
    ) -> Result<Vec<Message>, RepositoryError> {
        // 与 idx_messages_pair_created 的表达式一致
        let query = format!(
            r#"SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE LEAST(sender_id, recipient_id) = LEAST($1::uuid, $2::uuid)
              AND GREATEST(sender_id, recipient_id) = GREATEST($1::uuid, $2::uuid)
            ORDER BY created_at ASC"#
        );
        let records = sqlx::query_as::<_, MessageRecord>(&query)
            .bind(Uuid::from(participant_a))
            .bind(Uuid::from(participant_b))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }

    async fn update_text(
        &self,
        id: MessageId,
        requester: UserId,
        text: String,
    ) -> Result<Message, RepositoryError> {
        // 发送者校验与写入在同一条语句内完成
        let query = format!(
            r#"UPDATE messages
            SET text = $3, edited = TRUE
            WHERE id = $1 AND sender_id = $2
            RETURNING {MESSAGE_COLUMNS}"#
        );
        let record = sqlx::query_as::<_, MessageRecord>(&query)
            .bind(Uuid::from(id))
            .bind(Uuid::from(requester))
            .bind(&text)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if let Some(record) = record {
            return Message::try_from(record);
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM messages WHERE id = $1)")
            .bind(Uuid::from(id))
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if exists {
            Err(RepositoryError::Forbidden)
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    async fn delete(&self, id: MessageId) -> Result<Message, RepositoryError> {
        let query = format!("DELETE FROM messages WHERE id = $1 RETURNING {MESSAGE_COLUMNS}");
        let record = sqlx::query_as::<_, MessageRecord>(&query)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?
            .ok_or(RepositoryError::NotFound)?;

        Message::try_from(record)
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
