//! # Transport
//!
//! Construction and the two shapes a transport can take.
//!
//! [`TransportBuilder::build`] validates the configuration, prepares the connection source,
//! bootstraps the queue table and returns a [`Transport`]:
//!
//! - [`OneWayTransport`] for [`TransportMode::OneWay`]: send operations only
//! - [`SqlTransport`] for [`TransportMode::Full`]: send plus receive from the input queue
//!
//! The mode is fixed at construction. Asking a one-way [`Transport`] for its receiver fails
//! with a configuration error without touching the database.

pub mod backoff;
pub mod blocking;
pub mod reaper;
pub mod receive_loop;

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgConnection;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::config::{ReceiveMode, TransportConfig, TransportMode};
use crate::database::connection::{connection_source_from_config, ConnectionSource};
use crate::database::schema::{SchemaManager, TableName, TableStatus};
use crate::error::{TransportError, TransportResult};
use crate::events::{EventPublisher, TransportEvent, TransportEventKind};
use crate::messaging::admin::{QueueAdmin, QueueMetrics};
use crate::messaging::message::OutgoingMessage;
use crate::messaging::receiver::{DequeueEngine, ReceivedMessage};
use crate::messaging::sender::SendEngine;
use crate::pipeline::{
    configure_pipeline_for, IncomingPipeline, MessageDispatcher, TimeoutManagerSlot,
    TransportCapabilities,
};

pub use backoff::BackoffPolicy;
pub use blocking::{BlockingReceivedMessage, BlockingReceiver, StopSignal};
pub use reaper::ExpiredMessageReaper;
pub use receive_loop::ReceiveLoop;

/// Everything both transport shapes share
#[derive(Debug, Clone)]
struct TransportCore {
    config: TransportConfig,
    table: TableName,
    source: Arc<dyn ConnectionSource>,
    schema: SchemaManager,
    sender: SendEngine,
    admin: QueueAdmin,
    events: EventPublisher,
}

impl TransportCore {
    fn new(config: TransportConfig, events: Option<EventPublisher>) -> TransportResult<Self> {
        config.validate()?;

        let table = TableName::parse(&config.table_name)?;
        let source = connection_source_from_config(&config)?;
        let events = events.unwrap_or_else(|| EventPublisher::new(config.event_channel_capacity));

        Ok(Self {
            schema: SchemaManager::new(Arc::clone(&source), table.clone()),
            sender: SendEngine::new(Arc::clone(&source), table.clone()),
            admin: QueueAdmin::new(Arc::clone(&source), table.clone()),
            config,
            table,
            source,
            events,
        })
    }

    async fn bootstrap(&self) -> TransportResult<()> {
        let created = if self.config.auto_create_table {
            self.schema.ensure_table_exists().await?
        } else {
            match self.schema.verify_table().await? {
                TableStatus::Compatible => false,
                TableStatus::Missing => {
                    return Err(TransportError::schema_mismatch(
                        self.table.to_string(),
                        "table does not exist and auto_create_table is disabled",
                    ))
                }
            }
        };

        self.events.publish(TransportEventKind::TableReady {
            table: self.table.to_string(),
            created,
        });
        Ok(())
    }
}

/// Builds a [`Transport`] from a [`TransportConfig`]
#[derive(Debug)]
pub struct TransportBuilder {
    config: TransportConfig,
    events: Option<EventPublisher>,
}

impl TransportBuilder {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            events: None,
        }
    }

    /// Publish events on an existing publisher instead of a fresh one
    pub fn with_event_publisher(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate, connect and bootstrap the queue table
    #[instrument(skip(self), fields(table = %self.config.table_name))]
    pub async fn build(self) -> TransportResult<Transport> {
        let transport = self.build_without_bootstrap()?;
        transport.core().bootstrap().await?;

        info!(
            one_way = transport.is_one_way(),
            input_queue = transport.core().config.mode.input_queue(),
            "Transport ready"
        );
        Ok(transport)
    }

    /// Validate and assemble without touching the database.
    ///
    /// For hosts that manage the table themselves; nothing is checked until the first
    /// operation runs.
    pub fn build_without_bootstrap(self) -> TransportResult<Transport> {
        let core = TransportCore::new(self.config, self.events)?;

        let transport = match core.config.mode.clone() {
            TransportMode::OneWay => Transport::OneWay(OneWayTransport { core }),
            TransportMode::Full {
                input_queue,
                receive_mode,
            } => Transport::Full(SqlTransport {
                receiver: DequeueEngine::new(Arc::clone(&core.source), core.table.clone()),
                input_queue,
                receive_mode,
                core,
            }),
        };
        Ok(transport)
    }
}

/// A constructed transport of either shape
#[derive(Debug)]
pub enum Transport {
    OneWay(OneWayTransport),
    Full(SqlTransport),
}

impl Transport {
    fn core(&self) -> &TransportCore {
        match self {
            Self::OneWay(t) => &t.core,
            Self::Full(t) => &t.core,
        }
    }

    pub fn is_one_way(&self) -> bool {
        matches!(self, Self::OneWay(_))
    }

    /// The receiving side; a configuration error on a one-way transport
    pub fn receiver(&self) -> TransportResult<&SqlTransport> {
        match self {
            Self::Full(t) => Ok(t),
            Self::OneWay(_) => Err(one_way_error()),
        }
    }

    /// Take the receiving transport; a configuration error on a one-way transport
    pub fn into_full(self) -> TransportResult<SqlTransport> {
        match self {
            Self::Full(t) => Ok(t),
            Self::OneWay(_) => Err(one_way_error()),
        }
    }

    pub fn sender(&self) -> &SendEngine {
        &self.core().sender
    }

    pub async fn send(
        &self,
        queue: &str,
        message: &OutgoingMessage,
        delay: Duration,
    ) -> TransportResult<i64> {
        self.sender().send(queue, message, delay).await
    }

    pub async fn send_to_many(
        &self,
        queues: &[&str],
        message: &OutgoingMessage,
        delay: Duration,
    ) -> TransportResult<Vec<i64>> {
        self.sender().send_to_many(queues, message, delay).await
    }

    pub async fn send_in(
        &self,
        connection: &mut PgConnection,
        queue: &str,
        message: &OutgoingMessage,
        delay: Duration,
    ) -> TransportResult<i64> {
        self.sender().send_in(connection, queue, message, delay).await
    }

    pub fn table(&self) -> &TableName {
        &self.core().table
    }

    pub fn admin(&self) -> &QueueAdmin {
        &self.core().admin
    }

    pub fn schema(&self) -> &SchemaManager {
        &self.core().schema
    }

    pub fn events(&self) -> &EventPublisher {
        &self.core().events
    }

    pub fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities::SQL_TRANSPORT
    }

    /// Remove pipeline features this transport makes redundant
    pub fn configure_pipeline(
        &self,
        pipeline: &mut IncomingPipeline,
        timeout_manager: &mut TimeoutManagerSlot,
    ) {
        configure_pipeline_for(self.capabilities(), pipeline, timeout_manager);
    }
}

fn one_way_error() -> TransportError {
    TransportError::configuration(
        "transport_mode",
        "this transport is one-way (send-only) and cannot receive messages",
    )
}

/// Send-only transport
#[derive(Debug)]
pub struct OneWayTransport {
    core: TransportCore,
}

impl OneWayTransport {
    pub async fn send(
        &self,
        queue: &str,
        message: &OutgoingMessage,
        delay: Duration,
    ) -> TransportResult<i64> {
        self.core.sender.send(queue, message, delay).await
    }

    pub async fn send_to_many(
        &self,
        queues: &[&str],
        message: &OutgoingMessage,
        delay: Duration,
    ) -> TransportResult<Vec<i64>> {
        self.core.sender.send_to_many(queues, message, delay).await
    }

    pub async fn send_in(
        &self,
        connection: &mut PgConnection,
        queue: &str,
        message: &OutgoingMessage,
        delay: Duration,
    ) -> TransportResult<i64> {
        self.core.sender.send_in(connection, queue, message, delay).await
    }

    pub fn sender(&self) -> &SendEngine {
        &self.core.sender
    }

    pub async fn queue_metrics(&self, queue: &str) -> TransportResult<QueueMetrics> {
        self.core.admin.queue_metrics(queue).await
    }

    pub fn table(&self) -> &TableName {
        &self.core.table
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.core.events.subscribe()
    }
}

/// Full transport bound to one input queue
#[derive(Debug)]
pub struct SqlTransport {
    core: TransportCore,
    receiver: DequeueEngine,
    input_queue: String,
    receive_mode: ReceiveMode,
}

impl SqlTransport {
    pub fn input_queue(&self) -> &str {
        &self.input_queue
    }

    pub fn receive_mode(&self) -> ReceiveMode {
        self.receive_mode
    }

    pub fn table(&self) -> &TableName {
        &self.core.table
    }

    pub async fn send(
        &self,
        queue: &str,
        message: &OutgoingMessage,
        delay: Duration,
    ) -> TransportResult<i64> {
        self.core.sender.send(queue, message, delay).await
    }

    pub async fn send_to_many(
        &self,
        queues: &[&str],
        message: &OutgoingMessage,
        delay: Duration,
    ) -> TransportResult<Vec<i64>> {
        self.core.sender.send_to_many(queues, message, delay).await
    }

    pub async fn send_in(
        &self,
        connection: &mut PgConnection,
        queue: &str,
        message: &OutgoingMessage,
        delay: Duration,
    ) -> TransportResult<i64> {
        self.core.sender.send_in(connection, queue, message, delay).await
    }

    pub fn sender(&self) -> &SendEngine {
        &self.core.sender
    }

    /// Claim the next eligible message of the input queue
    pub async fn try_receive(&self) -> TransportResult<Option<ReceivedMessage>> {
        self.receiver.try_receive(&self.input_queue).await
    }

    /// Start the asynchronous receive workers (and the expired-message reaper, if enabled).
    ///
    /// Fails when the transport was configured for forced-synchronous receive; use
    /// [`BlockingReceiver`] for that mode.
    pub fn start_receiving(
        &self,
        dispatcher: Arc<dyn MessageDispatcher>,
    ) -> TransportResult<ReceiveLoop> {
        if self.receive_mode == ReceiveMode::ForcedSynchronous {
            return Err(TransportError::configuration(
                "receive_mode",
                "forced-synchronous receive runs on the caller's thread; use BlockingReceiver",
            ));
        }

        Ok(ReceiveLoop::start(
            self.receiver.clone(),
            self.input_queue.clone(),
            dispatcher,
            self.core.config.backoff.clone(),
            self.core.config.worker_count,
            self.core.events.clone(),
            self.reaper(),
        ))
    }

    /// The configured reaper for the input queue, `None` when cleanup is disabled
    pub fn reaper(&self) -> Option<ExpiredMessageReaper> {
        self.core
            .config
            .expired_messages_cleanup
            .clone()
            .map(|cleanup| {
                ExpiredMessageReaper::new(
                    self.core.admin.clone(),
                    self.input_queue.clone(),
                    cleanup,
                    self.core.events.clone(),
                )
            })
    }

    pub async fn queue_metrics(&self) -> TransportResult<QueueMetrics> {
        self.core.admin.queue_metrics(&self.input_queue).await
    }

    pub async fn purge_input_queue(&self) -> TransportResult<u64> {
        self.core.admin.purge_queue(&self.input_queue).await
    }

    pub fn admin(&self) -> &QueueAdmin {
        &self.core.admin
    }

    pub fn events(&self) -> &EventPublisher {
        &self.core.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.core.events.subscribe()
    }

    pub(crate) fn backoff_config(&self) -> &crate::config::BackoffConfig {
        &self.core.config.backoff
    }

    pub(crate) fn dequeue_engine(&self) -> &DequeueEngine {
        &self.receiver
    }
}
