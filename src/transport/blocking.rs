//! # Forced-Synchronous Receive
//!
//! [`BlockingReceiver`] serves hosts that must receive on their own thread. It owns a
//! current-thread tokio runtime; the transport and its connections are created on that runtime
//! and only ever driven by it, so every call blocks the calling thread until it finishes.
//!
//! Construct and use it outside any async context: blocking inside a tokio runtime panics.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::config::{ReceiveMode, TransportConfig};
use crate::error::{TransportError, TransportResult};
use crate::events::EventPublisher;
use crate::messaging::message::{OutgoingMessage, TransportMessage};
use crate::messaging::receiver::ReceivedMessage;
use crate::pipeline::MessageDispatcher;
use crate::transport::backoff::BackoffPolicy;
use crate::transport::receive_loop::{poll_once, PollOutcome};
use crate::transport::{SqlTransport, TransportBuilder};

/// Cross-thread stop request for [`BlockingReceiver::run`]
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

impl StopSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stop(&self) {
        *self.stopped.lock() = true;
        self.condvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleep up to `timeout`, returning early with `true` once stopped
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            self.condvar.wait_for(&mut stopped, timeout);
        }
        *stopped
    }
}

/// Receives on the calling thread
pub struct BlockingReceiver {
    transport: SqlTransport,
    runtime: Runtime,
}

impl fmt::Debug for BlockingReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingReceiver")
            .field("input_queue", &self.transport.input_queue())
            .field("table", &self.transport.table().to_string())
            .finish_non_exhaustive()
    }
}

impl BlockingReceiver {
    /// Build a full transport on a private runtime and bootstrap its table
    ///
    /// The configuration must select forced-synchronous receive.
    pub fn new(config: TransportConfig) -> TransportResult<Self> {
        Self::with_builder(config, None)
    }

    pub fn with_event_publisher(
        config: TransportConfig,
        events: EventPublisher,
    ) -> TransportResult<Self> {
        Self::with_builder(config, Some(events))
    }

    fn with_builder(
        config: TransportConfig,
        events: Option<EventPublisher>,
    ) -> TransportResult<Self> {
        match config.receive_mode() {
            Some(ReceiveMode::ForcedSynchronous) => {}
            Some(ReceiveMode::Asynchronous) => {
                return Err(TransportError::configuration(
                    "receive_mode",
                    "asynchronous receive runs on tokio tasks; use SqlTransport::start_receiving",
                ))
            }
            None => {
                return Err(TransportError::configuration(
                    "transport_mode",
                    "a one-way transport cannot receive",
                ))
            }
        }

        let mut builder = TransportBuilder::new(config);
        if let Some(events) = events {
            builder = builder.with_event_publisher(events);
        }

        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(TransportError::configuration(
                "blocking_receiver",
                "cannot be created from within an async runtime",
            ));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TransportError::configuration("blocking_receiver", e.to_string()))?;

        let transport = runtime.block_on(async { builder.build().await?.into_full() })?;

        info!(input_queue = %transport.input_queue(), "Blocking receiver ready");
        Ok(Self { transport, runtime })
    }

    pub fn transport(&self) -> &SqlTransport {
        &self.transport
    }

    pub fn send(
        &self,
        queue: &str,
        message: &OutgoingMessage,
        delay: Duration,
    ) -> TransportResult<i64> {
        self.runtime.block_on(self.transport.send(queue, message, delay))
    }

    /// Claim the next eligible message of the input queue, blocking until the query finishes
    pub fn try_receive(&self) -> TransportResult<Option<BlockingReceivedMessage<'_>>> {
        let received = self.runtime.block_on(self.transport.try_receive())?;
        Ok(received.map(|inner| BlockingReceivedMessage {
            message: inner.message().clone(),
            inner: Some(inner),
            runtime: &self.runtime,
        }))
    }

    /// Poll and dispatch on this thread until `stop` is signalled.
    ///
    /// Returns after the in-flight message, if any, has been committed or rolled back.
    pub fn run(&self, dispatcher: &dyn MessageDispatcher, stop: &StopSignal) {
        let mut backoff = BackoffPolicy::new(self.transport.backoff_config().clone());
        let events = self.transport.events().clone();
        let queue = self.transport.input_queue().to_string();

        debug!(queue = %queue, "Blocking receive loop started");
        while !stop.is_stopped() {
            let outcome = self.runtime.block_on(poll_once(
                self.transport.dequeue_engine(),
                &queue,
                dispatcher,
                &events,
                0,
            ));

            if outcome == PollOutcome::Processed {
                backoff.reset();
                continue;
            }
            if stop.wait_timeout(backoff.next_delay()) {
                break;
            }
        }
        debug!(queue = %queue, "Blocking receive loop stopped");
    }
}

/// A claimed message whose unit of work is finished on the receiver's runtime
pub struct BlockingReceivedMessage<'a> {
    message: TransportMessage,
    inner: Option<ReceivedMessage>,
    runtime: &'a Runtime,
}

impl fmt::Debug for BlockingReceivedMessage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingReceivedMessage")
            .field("sequence_id", &self.message.sequence_id)
            .finish_non_exhaustive()
    }
}

impl BlockingReceivedMessage<'_> {
    pub fn message(&self) -> &TransportMessage {
        &self.message
    }

    pub fn complete(mut self) -> TransportResult<()> {
        match self.inner.take() {
            Some(inner) => self.runtime.block_on(inner.complete()),
            None => Ok(()),
        }
    }

    pub fn abandon(mut self) -> TransportResult<()> {
        match self.inner.take() {
            Some(inner) => self.runtime.block_on(inner.abandon()),
            None => Ok(()),
        }
    }
}

impl Drop for BlockingReceivedMessage<'_> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            // Roll back explicitly: the pooled connection can only be returned from inside
            // the runtime that owns it.
            let sequence_id = self.message.sequence_id;
            if let Err(e) = self.runtime.block_on(inner.abandon()) {
                warn!(sequence_id, error = %e, "Rollback of dropped message failed");
            }
        }
    }
}
