//! Periodic deletion of expired messages on the input queue.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ExpiredMessagesCleanupConfig;
use crate::error::TransportResult;
use crate::events::{EventPublisher, TransportEventKind};
use crate::messaging::admin::QueueAdmin;
use crate::transport::receive_loop::LoopState;

/// Deletes expired rows of one queue in batches, skipping rows a receiver holds
#[derive(Debug, Clone)]
pub struct ExpiredMessageReaper {
    admin: QueueAdmin,
    queue: String,
    config: ExpiredMessagesCleanupConfig,
    events: EventPublisher,
}

impl ExpiredMessageReaper {
    pub fn new(
        admin: QueueAdmin,
        queue: String,
        config: ExpiredMessagesCleanupConfig,
        events: EventPublisher,
    ) -> Self {
        Self {
            admin,
            queue,
            config,
            events,
        }
    }

    /// Delete every expired row currently present, batch by batch
    pub async fn reap_once(&self) -> TransportResult<u64> {
        let mut total = 0;
        loop {
            let deleted = self
                .admin
                .delete_expired(&self.queue, self.config.batch_size)
                .await?;
            total += deleted;
            if deleted < u64::from(self.config.batch_size) {
                break;
            }
        }

        if total > 0 {
            info!(queue = %self.queue, deleted = total, "Reaped expired messages");
            self.events.publish(TransportEventKind::ExpiredMessagesReaped {
                queue: self.queue.clone(),
                deleted: total,
            });
        }
        Ok(total)
    }

    pub(crate) async fn run(self, state: Arc<LoopState>) {
        debug!(
            queue = %self.queue,
            interval_ms = self.config.interval.as_millis() as u64,
            "Expired message reaper started"
        );

        while state.pause(self.config.interval).await {
            if let Err(e) = self.reap_once().await {
                warn!(queue = %self.queue, error = %e, "Expired message cleanup failed");
            }
        }

        debug!(queue = %self.queue, "Expired message reaper stopped");
    }
}
