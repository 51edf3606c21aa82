//! # Queue Administration
//!
//! Inspection and housekeeping over a single queue. None of these operations block on rows
//! a receiver currently holds.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::database::connection::{with_timeout, ConnectionSource};
use crate::database::schema::TableName;
use crate::error::TransportResult;
use crate::messaging::message::validate_queue_name;

/// Row counts for one queue, evaluated against a single database timestamp.
///
/// Rows held by an in-flight receiver still count until their claim completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub total: i64,
    /// Visible and not expired
    pub ready: i64,
    /// Not yet visible and not expired
    pub deferred: i64,
    pub expired: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct MetricsRow {
    total: i64,
    ready: i64,
    deferred: i64,
    expired: i64,
}

/// Housekeeping statements for the queue table
#[derive(Debug, Clone)]
pub struct QueueAdmin {
    source: Arc<dyn ConnectionSource>,
    table: TableName,
}

impl QueueAdmin {
    pub fn new(source: Arc<dyn ConnectionSource>, table: TableName) -> Self {
        Self { source, table }
    }

    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn queue_metrics(&self, queue: &str) -> TransportResult<QueueMetrics> {
        validate_queue_name(queue)?;

        let sql = format!(
            r#"
            WITH now AS (SELECT clock_timestamp() AS ts)
            SELECT
                COUNT(*)::bigint AS total,
                (COUNT(*) FILTER (
                    WHERE t.visible_at <= now.ts
                      AND (t.expires_at IS NULL OR t.expires_at > now.ts)
                ))::bigint AS ready,
                (COUNT(*) FILTER (
                    WHERE t.visible_at > now.ts
                      AND (t.expires_at IS NULL OR t.expires_at > now.ts)
                ))::bigint AS deferred,
                (COUNT(*) FILTER (
                    WHERE t.expires_at IS NOT NULL AND t.expires_at <= now.ts
                ))::bigint AS expired
            FROM {} t CROSS JOIN now
            WHERE t.recipient_queue = $1
            "#,
            self.table.quoted()
        );

        let mut scoped = self.source.acquire().await?;
        let row: MetricsRow = with_timeout(
            "queue_metrics",
            self.source.operation_timeout(),
            sqlx::query_as(&sql).bind(queue).fetch_one(scoped.connection()),
        )
        .await?;
        scoped.commit().await?;

        Ok(QueueMetrics {
            total: row.total,
            ready: row.ready,
            deferred: row.deferred,
            expired: row.expired,
        })
    }

    /// Delete every row of `queue` that no receiver currently holds
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn purge_queue(&self, queue: &str) -> TransportResult<u64> {
        validate_queue_name(queue)?;

        let quoted = self.table.quoted();
        let sql = format!(
            r#"
            DELETE FROM {quoted}
            WHERE sequence_id IN (
                SELECT sequence_id FROM {quoted}
                WHERE recipient_queue = $1
                FOR UPDATE SKIP LOCKED
            )
            "#
        );

        let mut scoped = self.source.acquire().await?;
        let result = with_timeout(
            "purge_queue",
            self.source.operation_timeout(),
            sqlx::query(&sql).bind(queue).execute(scoped.connection()),
        )
        .await?;
        scoped.commit().await?;

        let purged = result.rows_affected();
        info!(queue = %queue, purged, "Queue purged");
        Ok(purged)
    }

    /// Delete up to `batch_size` expired rows of `queue`, oldest first
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn delete_expired(&self, queue: &str, batch_size: u32) -> TransportResult<u64> {
        validate_queue_name(queue)?;

        let quoted = self.table.quoted();
        let sql = format!(
            r#"
            DELETE FROM {quoted}
            WHERE sequence_id IN (
                SELECT sequence_id FROM {quoted}
                WHERE recipient_queue = $1
                  AND expires_at IS NOT NULL
                  AND expires_at <= clock_timestamp()
                ORDER BY sequence_id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            "#
        );

        let mut scoped = self.source.acquire().await?;
        let result = with_timeout(
            "delete_expired",
            self.source.operation_timeout(),
            sqlx::query(&sql)
                .bind(queue)
                .bind(i64::from(batch_size))
                .execute(scoped.connection()),
        )
        .await?;
        scoped.commit().await?;

        let deleted = result.rows_affected();
        debug!(queue = %queue, deleted, "Expired messages deleted");
        Ok(deleted)
    }
}
