//! # Send Engine
//!
//! Enqueues one row per destination queue. Delay and expiry are resolved against the
//! database clock at insert time:
//!
//! - `visible_at = clock_timestamp() + delay` (zero delay means visible immediately)
//! - `expires_at = clock_timestamp() + time_to_be_received`, or NULL
//!
//! Deferred delivery is nothing more than a future `visible_at`; the dequeue filter resolves
//! it, so no timer or scheduler exists anywhere in the transport.
//!
//! Three entry points share one insert statement:
//! - [`SendEngine::send`] - own unit of work, one destination
//! - [`SendEngine::send_to_many`] - own unit of work, all destinations or none
//! - [`SendEngine::send_in`] - the caller's open transaction (outbox pattern)

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgConnection;
use tracing::{debug, instrument};

use crate::database::connection::{with_timeout, ConnectionSource};
use crate::database::schema::TableName;
use crate::error::TransportResult;
use crate::messaging::message::{validate_queue_name, OutgoingMessage};

/// Inserts message rows
#[derive(Debug, Clone)]
pub struct SendEngine {
    source: Arc<dyn ConnectionSource>,
    table: TableName,
    insert_sql: String,
}

impl SendEngine {
    pub fn new(source: Arc<dyn ConnectionSource>, table: TableName) -> Self {
        let insert_sql = format!(
            r#"
            INSERT INTO {} (recipient_queue, headers, body, visible_at, expires_at)
            VALUES (
                $1,
                $2,
                $3,
                clock_timestamp() + make_interval(secs => $4::float8),
                clock_timestamp() + make_interval(secs => $5::float8)
            )
            RETURNING sequence_id
            "#,
            table.quoted()
        );

        Self {
            source,
            table,
            insert_sql,
        }
    }

    /// Enqueue `message` to `queue`, visible after `delay`
    #[instrument(skip(self, message), fields(table = %self.table))]
    pub async fn send(
        &self,
        queue: &str,
        message: &OutgoingMessage,
        delay: Duration,
    ) -> TransportResult<i64> {
        validate_queue_name(queue)?;

        let mut scoped = self.source.acquire().await?;
        let sequence_id = self
            .insert(scoped.connection(), queue, message, delay)
            .await?;
        scoped.commit().await?;

        Ok(sequence_id)
    }

    /// Enqueue `message` to every queue in `queues` inside one unit of work.
    ///
    /// Either every destination receives a row or none does.
    #[instrument(skip(self, message), fields(table = %self.table, destinations = queues.len()))]
    pub async fn send_to_many(
        &self,
        queues: &[&str],
        message: &OutgoingMessage,
        delay: Duration,
    ) -> TransportResult<Vec<i64>> {
        for queue in queues {
            validate_queue_name(queue)?;
        }
        if queues.is_empty() {
            return Ok(Vec::new());
        }

        let mut scoped = self.source.acquire().await?;
        let mut sequence_ids = Vec::with_capacity(queues.len());
        for queue in queues {
            // An error here drops `scoped`, rolling back the rows already inserted.
            let id = self
                .insert(scoped.connection(), queue, message, delay)
                .await?;
            sequence_ids.push(id);
        }
        scoped.commit().await?;

        Ok(sequence_ids)
    }

    /// Enqueue inside a transaction the caller already holds.
    ///
    /// The row becomes visible to receivers only when the caller commits, and disappears
    /// if the caller rolls back.
    #[instrument(skip(self, connection, message), fields(table = %self.table))]
    pub async fn send_in(
        &self,
        connection: &mut PgConnection,
        queue: &str,
        message: &OutgoingMessage,
        delay: Duration,
    ) -> TransportResult<i64> {
        validate_queue_name(queue)?;
        self.insert(connection, queue, message, delay).await
    }

    async fn insert(
        &self,
        connection: &mut PgConnection,
        queue: &str,
        message: &OutgoingMessage,
        delay: Duration,
    ) -> TransportResult<i64> {
        let expires_in = message.time_to_be_received.map(|ttl| ttl.as_secs_f64());

        let sequence_id: i64 = with_timeout(
            "send",
            self.source.operation_timeout(),
            sqlx::query_scalar(&self.insert_sql)
                .bind(queue)
                .bind(sqlx::types::Json(&message.headers))
                .bind(&message.body)
                .bind(delay.as_secs_f64())
                .bind(expires_in)
                .fetch_one(connection),
        )
        .await?;

        debug!(
            queue = %queue,
            sequence_id,
            delay_ms = delay.as_millis() as u64,
            message_id = message.message_id(),
            "Message enqueued"
        );

        Ok(sequence_id)
    }
}
