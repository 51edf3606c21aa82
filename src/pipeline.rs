//! # Pipeline Integration
//!
//! The seams between the transport and the message-processing pipeline that sits above it:
//!
//! - [`MessageDispatcher`] receives every claimed message from the receive loop
//! - [`IncomingPipeline`] is the ordered list of incoming steps the host assembles
//! - [`configure_pipeline`] negotiates capabilities at wiring time: this transport delivers
//!   deferred messages natively, so the generic deferred-message step is removed and the
//!   timeout manager is replaced with one that refuses to be used

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::info;

use crate::error::{TransportError, TransportResult};
use crate::messaging::message::TransportMessage;

/// Hands claimed messages to the pipeline.
///
/// Returning `Ok` completes the claim; returning `Err` rolls it back and the message becomes
/// visible again.
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    async fn dispatch(&self, message: &TransportMessage) -> anyhow::Result<()>;

    /// Called by the receive loop with the claim's open connection.
    ///
    /// Override to enlist work (including [`SendEngine::send_in`](crate::messaging::SendEngine::send_in))
    /// in the same unit of work that consumes the message.
    async fn dispatch_in(
        &self,
        message: &TransportMessage,
        _connection: &mut PgConnection,
    ) -> anyhow::Result<()> {
        self.dispatch(message).await
    }
}

#[async_trait]
impl<D: MessageDispatcher + ?Sized> MessageDispatcher for Arc<D> {
    async fn dispatch(&self, message: &TransportMessage) -> anyhow::Result<()> {
        (**self).dispatch(message).await
    }

    async fn dispatch_in(
        &self,
        message: &TransportMessage,
        connection: &mut PgConnection,
    ) -> anyhow::Result<()> {
        (**self).dispatch_in(message, connection).await
    }
}

/// Steps of the incoming message pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IncomingStep {
    DeserializeMessage,
    /// Generic deferral: parks messages with a future delivery time in a timeout manager
    HandleDeferredMessages,
    ActivateHandlers,
    DispatchIncomingMessage,
    Custom(String),
}

/// Ordered incoming steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingPipeline {
    steps: Vec<IncomingStep>,
}

impl Default for IncomingPipeline {
    fn default() -> Self {
        Self {
            steps: vec![
                IncomingStep::DeserializeMessage,
                IncomingStep::HandleDeferredMessages,
                IncomingStep::ActivateHandlers,
                IncomingStep::DispatchIncomingMessage,
            ],
        }
    }
}

impl IncomingPipeline {
    pub fn new(steps: Vec<IncomingStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[IncomingStep] {
        &self.steps
    }

    pub fn contains(&self, step: &IncomingStep) -> bool {
        self.steps.contains(step)
    }

    /// Remove every occurrence of `step`, returning how many were removed
    pub fn remove_step(&mut self, step: &IncomingStep) -> usize {
        let before = self.steps.len();
        self.steps.retain(|s| s != step);
        before - self.steps.len()
    }
}

/// Deferred-delivery storage used by pipelines whose transport cannot defer natively
pub trait TimeoutManager: Send + Sync + std::fmt::Debug {
    fn defer(
        &self,
        due_time: DateTime<Utc>,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    ) -> TransportResult<()>;

    fn due_messages(&self) -> TransportResult<Vec<(HashMap<String, String>, Vec<u8>)>>;
}

/// Installed in place of a real timeout manager; every call is an error
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledTimeoutManager;

impl DisabledTimeoutManager {
    fn refuse(&self) -> TransportError {
        TransportError::configuration(
            "timeout_manager",
            "the timeout manager is disabled because the SQL transport delivers deferred \
             messages natively; send with a delay instead",
        )
    }
}

impl TimeoutManager for DisabledTimeoutManager {
    fn defer(
        &self,
        _due_time: DateTime<Utc>,
        _headers: HashMap<String, String>,
        _body: Vec<u8>,
    ) -> TransportResult<()> {
        Err(self.refuse())
    }

    fn due_messages(&self) -> TransportResult<Vec<(HashMap<String, String>, Vec<u8>)>> {
        Err(self.refuse())
    }
}

/// The timeout manager the pipeline will use, if any
pub type TimeoutManagerSlot = Option<Arc<dyn TimeoutManager>>;

/// What a transport can do without help from the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportCapabilities {
    pub native_deferred_delivery: bool,
}

impl TransportCapabilities {
    /// Capabilities of the SQL table transport
    pub const SQL_TRANSPORT: Self = Self {
        native_deferred_delivery: true,
    };
}

/// Adjust `pipeline` and `timeout_manager` to `capabilities`
pub fn configure_pipeline_for(
    capabilities: TransportCapabilities,
    pipeline: &mut IncomingPipeline,
    timeout_manager: &mut TimeoutManagerSlot,
) {
    if !capabilities.native_deferred_delivery {
        return;
    }

    let removed = pipeline.remove_step(&IncomingStep::HandleDeferredMessages);
    *timeout_manager = Some(Arc::new(DisabledTimeoutManager));
    info!(
        removed_steps = removed,
        "Native deferred delivery: deferred-message step removed, timeout manager disabled"
    );
}

/// Wire the pipeline for the SQL table transport
pub fn configure_pipeline(pipeline: &mut IncomingPipeline, timeout_manager: &mut TimeoutManagerSlot) {
    configure_pipeline_for(TransportCapabilities::SQL_TRANSPORT, pipeline, timeout_manager);
}
