//! # Dequeue Engine
//!
//! Claims one eligible row from a queue and holds it inside an open unit of work.
//!
//! A row is eligible when it belongs to the queue, its `visible_at` has passed and it has
//! not expired. The claim deletes the row with `FOR UPDATE SKIP LOCKED`, so concurrent
//! receivers never block on, or see, a row another receiver holds. The delete only becomes
//! permanent when the holder completes; abandoning or dropping the claim puts the row back.

use std::fmt;
use std::sync::Arc;

use sqlx::PgConnection;
use tracing::{debug, instrument, warn};

use crate::database::connection::{with_timeout, ConnectionSource, ScopedConnection};
use crate::database::schema::TableName;
use crate::error::TransportResult;
use crate::messaging::message::{validate_queue_name, MessageRow, TransportMessage};

/// Claims rows from a queue
#[derive(Debug, Clone)]
pub struct DequeueEngine {
    source: Arc<dyn ConnectionSource>,
    table: TableName,
    receive_sql: String,
}

impl DequeueEngine {
    pub fn new(source: Arc<dyn ConnectionSource>, table: TableName) -> Self {
        let quoted = table.quoted();
        let receive_sql = format!(
            r#"
            DELETE FROM {quoted}
            WHERE sequence_id = (
                SELECT sequence_id
                FROM {quoted}
                WHERE recipient_queue = $1
                  AND visible_at <= clock_timestamp()
                  AND (expires_at IS NULL OR expires_at > clock_timestamp())
                ORDER BY sequence_id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING sequence_id, recipient_queue, headers, body, visible_at, expires_at
            "#
        );

        Self {
            source,
            table,
            receive_sql,
        }
    }

    /// Claim the oldest eligible message of `queue`, or `None` when nothing is eligible.
    ///
    /// The returned claim keeps its unit of work open until it is completed or abandoned.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn try_receive(&self, queue: &str) -> TransportResult<Option<ReceivedMessage>> {
        validate_queue_name(queue)?;

        let mut scoped = self.source.acquire().await?;
        let row: Option<MessageRow> = with_timeout(
            "receive",
            self.source.operation_timeout(),
            sqlx::query_as(&self.receive_sql)
                .bind(queue)
                .fetch_optional(scoped.connection()),
        )
        .await?;

        match row {
            Some(row) => {
                let sequence_id = row.sequence_id;
                // Dropping `scoped` on error leaves the row queued.
                let message = TransportMessage::try_from(row).map_err(|e| {
                    warn!(queue = %queue, sequence_id, error = %e, "Unreadable message headers");
                    e
                })?;
                debug!(
                    queue = %queue,
                    sequence_id = message.sequence_id,
                    message_id = message.message_id(),
                    "Message claimed"
                );
                Ok(Some(ReceivedMessage::new(message, scoped)))
            }
            None => {
                // Nothing was touched; release the unit of work right away.
                scoped.commit().await?;
                Ok(None)
            }
        }
    }
}

/// A claimed message and the unit of work that holds it.
///
/// [`complete`](Self::complete) makes the removal permanent. [`abandon`](Self::abandon),
/// or dropping the claim, returns the message to the queue at its original position.
pub struct ReceivedMessage {
    message: TransportMessage,
    scoped: ScopedConnection,
}

impl fmt::Debug for ReceivedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceivedMessage")
            .field("sequence_id", &self.message.sequence_id)
            .field("recipient_queue", &self.message.recipient_queue)
            .finish_non_exhaustive()
    }
}

impl ReceivedMessage {
    pub(crate) fn new(message: TransportMessage, scoped: ScopedConnection) -> Self {
        Self { message, scoped }
    }

    pub fn message(&self) -> &TransportMessage {
        &self.message
    }

    /// Both halves at once, so a handler can read the message while enlisting its own
    /// statements (and outgoing sends) in the claim's unit of work
    pub fn parts(&mut self) -> (&TransportMessage, &mut PgConnection) {
        (&self.message, self.scoped.connection())
    }

    pub fn connection(&mut self) -> &mut PgConnection {
        self.scoped.connection()
    }

    pub async fn complete(self) -> TransportResult<()> {
        let sequence_id = self.message.sequence_id;
        self.scoped.commit().await?;
        debug!(sequence_id, "Message completed");
        Ok(())
    }

    pub async fn abandon(self) -> TransportResult<()> {
        let sequence_id = self.message.sequence_id;
        self.scoped.rollback().await?;
        debug!(sequence_id, "Message abandoned");
        Ok(())
    }
}
