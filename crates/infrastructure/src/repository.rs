use std::time::Duration;

use application::{MessageFilter, MessageLog, ParticipantRegistry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Message, MessageKind, Participant, ParticipantName, RepositoryError, Timestamp,
    BROADCAST_RECIPIENT,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, QueryBuilder};

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct ParticipantRecord {
    name: String,
    last_status: i64,
}

impl TryFrom<ParticipantRecord> for Participant {
    type Error = RepositoryError;

    fn try_from(value: ParticipantRecord) -> Result<Self, Self::Error> {
        let name =
            ParticipantName::parse(value.name).map_err(|err| invalid_data(err.to_string()))?;
        let last_seen = DateTime::<Utc>::from_timestamp_millis(value.last_status)
            .ok_or_else(|| invalid_data(format!("invalid last_status {}", value.last_status)))?;

        Ok(Participant { name, last_seen })
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    from_name: String,
    to_name: String,
    text: String,
    kind: String,
    time: String,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let kind = value
            .kind
            .parse::<MessageKind>()
            .map_err(|err| invalid_data(err.to_string()))?;

        Ok(Message {
            from: value.from_name,
            to: value.to_name,
            text: value.text,
            kind,
            time: value.time,
        })
    }
}

#[derive(Clone)]
pub struct PgParticipantRegistry {
    pool: PgPool,
}

impl PgParticipantRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ParticipantRegistry for PgParticipantRegistry {
    async fn register(
        &self,
        name: ParticipantName,
        now: Timestamp,
    ) -> Result<Participant, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO participants (name, last_status) VALUES ($1, $2) \
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(name.as_str())
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict);
        }

        // 存储精度为毫秒
        let last_seen = DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        Ok(Participant { name, last_seen })
    }

    async fn touch(&self, name: &ParticipantName, now: Timestamp) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE participants SET last_status = $2 WHERE name = $1")
            .bind(name.as_str())
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get(&self, name: &ParticipantName) -> Result<Option<Participant>, RepositoryError> {
        let record = sqlx::query_as::<_, ParticipantRecord>(
            "SELECT name, last_status FROM participants WHERE name = $1",
        )
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Participant::try_from).transpose()
    }

    async fn exists(&self, name: &ParticipantName) -> Result<bool, RepositoryError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM participants WHERE name = $1)")
            .bind(name.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)
    }

    async fn list(&self) -> Result<Vec<Participant>, RepositoryError> {
        let records =
            sqlx::query_as::<_, ParticipantRecord>("SELECT name, last_status FROM participants")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_err)?;

        records.into_iter().map(Participant::try_from).collect()
    }

    async fn remove(&self, name: &ParticipantName) -> Result<Participant, RepositoryError> {
        let record = sqlx::query_as::<_, ParticipantRecord>(
            "DELETE FROM participants WHERE name = $1 RETURNING name, last_status",
        )
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        Participant::try_from(record)
    }
}

#[derive(Clone)]
pub struct PgMessageLog {
    pool: PgPool,
}

impl PgMessageLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageLog for PgMessageLog {
    async fn append(&self, message: Message) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO messages (from_name, to_name, text, kind, time) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&message.from)
        .bind(&message.to)
        .bind(&message.text)
        .bind(message.kind.as_str())
        .bind(&message.time)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn query(&self, filter: MessageFilter) -> Result<Vec<Message>, RepositoryError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT from_name, to_name, text, kind, time FROM messages WHERE to_name = ");
        builder.push_bind(BROADCAST_RECIPIENT);
        if let Some(viewer) = &filter.viewer {
            builder
                .push(" OR to_name = ")
                .push_bind(viewer.as_str().to_owned())
                .push(" OR from_name = ")
                .push_bind(viewer.as_str().to_owned());
        }

        // 有尾部限制时倒序取最新的 N 条，再翻转回到达顺序
        match filter.tail {
            Some(limit) => {
                builder
                    .push(" ORDER BY id DESC LIMIT ")
                    .push_bind(i64::try_from(limit.get()).unwrap_or(i64::MAX));
            }
            None => {
                builder.push(" ORDER BY id ASC");
            }
        }

        let records = builder
            .build_query_as::<MessageRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        let mut messages = records
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        if filter.tail.is_some() {
            messages.reverse();
        }
        Ok(messages)
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
}
