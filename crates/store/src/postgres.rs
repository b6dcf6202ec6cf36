//! Postgres-backed outbox store.
//!
//! Crash-durable persistence with safe concurrent claiming. A single table
//! keyed by message id with an index on `next_attempt_at` is the whole
//! schema.
//!
//! ## Claim exclusivity
//!
//! `poll_next_due`/`poll_batch` run one atomic statement: the earliest due
//! rows are selected with `FOR UPDATE SKIP LOCKED`, deleted, and returned.
//! Row locking guarantees two concurrent pollers — in this process or
//! another — never claim the same row; `SKIP LOCKED` keeps pollers from
//! queueing behind each other's claims.
//!
//! ## Thread safety
//!
//! Uses the SQLx connection pool, which is `Send + Sync`; the store can be
//! shared freely across tasks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use std::sync::Arc;
use tracing::{debug, instrument};

use courier_core::{Channel, MessageId, OutboxMessage};

use super::r#trait::{Health, OutboxStore, OutboxStoreError};

/// Table + index backing the store. Kept here so deployments without a
/// migration tool can apply it via [`PostgresOutboxStore::ensure_schema`].
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS outbox_messages (
    id              UUID PRIMARY KEY,
    recipient       TEXT NOT NULL,
    subject         TEXT NOT NULL,
    body            TEXT NOT NULL,
    channel         TEXT NOT NULL,
    attempts        INTEGER NOT NULL DEFAULT 0,
    next_attempt_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_outbox_messages_next_attempt_at
    ON outbox_messages (next_attempt_at);
"#;

/// Durable outbox store on PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresOutboxStore {
    pool: Arc<PgPool>,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the backing table and index if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), OutboxStoreError> {
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    #[instrument(skip(self, msg), fields(message_id = %msg.id), err)]
    async fn save(&self, msg: OutboxMessage) -> Result<(), OutboxStoreError> {
        sqlx::query(
            r#"
            INSERT INTO outbox_messages
                (id, recipient, subject, body, channel, attempts, next_attempt_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id)
            DO UPDATE SET
                recipient = EXCLUDED.recipient,
                subject = EXCLUDED.subject,
                body = EXCLUDED.body,
                channel = EXCLUDED.channel,
                attempts = EXCLUDED.attempts,
                next_attempt_at = EXCLUDED.next_attempt_at
            "#,
        )
        .bind(msg.id.as_uuid())
        .bind(&msg.recipient)
        .bind(&msg.subject)
        .bind(&msg.body)
        .bind(msg.channel.as_str())
        .bind(msg.attempts as i32)
        .bind(msg.next_attempt_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(message_id = %id), err)]
    async fn delete(&self, id: MessageId) -> Result<(), OutboxStoreError> {
        // Absent rows are a no-op by construction.
        sqlx::query("DELETE FROM outbox_messages WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;

        Ok(())
    }

    async fn poll_next_due(&self) -> Result<Option<OutboxMessage>, OutboxStoreError> {
        Ok(self.poll_batch(1).await?.pop())
    }

    #[instrument(skip(self), err)]
    async fn poll_batch(&self, batch_size: usize) -> Result<Vec<OutboxMessage>, OutboxStoreError> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            DELETE FROM outbox_messages
            WHERE id IN (
                SELECT id
                FROM outbox_messages
                WHERE next_attempt_at <= NOW()
                ORDER BY next_attempt_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, recipient, subject, body, channel, attempts, next_attempt_at
            "#,
        )
        .bind(batch_size as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("poll_batch", e))?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            messages.push(message_from_row(&row)?);
        }

        if !messages.is_empty() {
            debug!(count = messages.len(), "claimed due messages");
        }
        Ok(messages)
    }

    async fn health(&self) -> Health {
        match sqlx::query("SELECT 1").fetch_one(&*self.pool).await {
            Ok(_) => Health::Up,
            Err(e) => {
                debug!(error = %e, "postgres health probe failed");
                Health::Down
            }
        }
    }
}

fn message_from_row(row: &PgRow) -> Result<OutboxMessage, OutboxStoreError> {
    let id: uuid::Uuid = try_column(row, "id")?;
    let recipient: String = try_column(row, "recipient")?;
    let subject: String = try_column(row, "subject")?;
    let body: String = try_column(row, "body")?;
    let channel: String = try_column(row, "channel")?;
    let attempts: i32 = try_column(row, "attempts")?;
    let next_attempt_at: DateTime<Utc> = try_column(row, "next_attempt_at")?;

    Ok(OutboxMessage {
        id: MessageId::from_uuid(id),
        recipient,
        subject,
        body,
        channel: channel_from_str(&channel)?,
        attempts: attempts.max(0) as u32,
        next_attempt_at,
    })
}

fn try_column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, OutboxStoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| OutboxStoreError::backend(format!("failed to read column {name}: {e}")))
}

fn channel_from_str(value: &str) -> Result<Channel, OutboxStoreError> {
    match value {
        "email" => Ok(Channel::Email),
        "sms" => Ok(Channel::Sms),
        "push" => Ok(Channel::Push),
        other => Err(OutboxStoreError::backend(format!(
            "unknown channel in outbox row: {other}"
        ))),
    }
}

/// Map SQLx errors to the store error, keeping the failing operation in the
/// message for the failover layer's logs.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> OutboxStoreError {
    match err {
        sqlx::Error::Database(db_err) => OutboxStoreError::backend(format!(
            "database error in {}: {}",
            operation,
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            OutboxStoreError::backend(format!("connection pool closed in {operation}"))
        }
        _ => OutboxStoreError::backend(format!("sqlx error in {operation}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_mapping_round_trips() {
        for channel in [Channel::Email, Channel::Sms, Channel::Push] {
            assert_eq!(channel_from_str(channel.as_str()).unwrap(), channel);
        }
    }

    #[test]
    fn unknown_channel_is_a_backend_error() {
        let err = channel_from_str("carrier_pigeon").unwrap_err();
        assert!(matches!(err, OutboxStoreError::Backend(_)));
    }

    #[test]
    fn sqlx_errors_keep_the_operation_name() {
        let err = map_sqlx_error("poll_batch", sqlx::Error::PoolClosed);
        assert!(err.to_string().contains("poll_batch"));
    }

    #[test]
    fn schema_covers_table_and_due_index() {
        assert!(SCHEMA.contains("outbox_messages"));
        assert!(SCHEMA.contains("next_attempt_at"));
        assert!(SCHEMA.contains("CREATE INDEX IF NOT EXISTS"));
    }
}
